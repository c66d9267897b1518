//! Functions, declarations and the module container.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{IrError, IrResult};
use crate::instruction::{Instruction, Terminator};
use crate::types::Type;

/// A labelled straight-line sequence ending in one terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    /// `None` only while the block is under construction.
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }

    /// Labels of successor blocks.
    pub fn successors(&self) -> Vec<&str> {
        self.terminator
            .as_ref()
            .map(Terminator::successors)
            .unwrap_or_default()
    }
}

/// Symbol visibility of a defined function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Linkage {
    #[default]
    External,
    Internal,
}

/// A function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub linkage: Linkage,
    /// Attribute group id printed after the signature.
    pub attributes: Option<u32>,
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    /// Find a block by label.
    pub fn block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }

    /// The entry block (first block).
    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    /// All instructions in block order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Callees of every call in the function, in order.
    pub fn calls(&self) -> impl Iterator<Item = &str> + '_ {
        self.instructions().filter_map(Instruction::callee)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let linkage = match self.linkage {
            Linkage::External => "",
            Linkage::Internal => "internal ",
        };
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(name, ty)| format!("{ty} %{name}"))
            .collect();
        write!(
            f,
            "define {linkage}{} @{}({})",
            self.ret,
            self.name,
            params.join(", ")
        )?;
        if let Some(id) = self.attributes {
            write!(f, " #{id}")?;
        }
        writeln!(f, " {{")?;

        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.label)?;
            for inst in &block.instructions {
                writeln!(f, "  {inst}")?;
            }
            if let Some(term) = &block.terminator {
                writeln!(f, "  {term}")?;
            }
        }
        write!(f, "}}")
    }
}

/// An external function declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Type>,
    pub attributes: Option<u32>,
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        write!(f, "declare {} @{}({})", self.ret, self.name, params.join(", "))?;
        if let Some(id) = self.attributes {
            write!(f, " #{id}")?;
        }
        Ok(())
    }
}

/// One entry of an attribute group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    /// `"name"`
    Flag(String),
    /// `"name"="value"`
    Pair(String, String),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Flag(name) => write!(f, "\"{name}\""),
            Attribute::Pair(name, value) => write!(f, "\"{name}\"=\"{value}\""),
        }
    }
}

/// Value of a module flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagValue {
    I32(i32),
    Bool(bool),
    /// Metadata tuple of strings, `!{!"a", !"b"}`.
    Strings(Vec<String>),
}

/// `!{i32 behavior, !"key", value}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFlag {
    pub behavior: u32,
    pub key: String,
    pub value: FlagValue,
}

impl ModuleFlag {
    pub fn new(behavior: u32, key: impl Into<String>, value: FlagValue) -> Self {
        Self {
            behavior,
            key: key.into(),
            value,
        }
    }
}

impl fmt::Display for ModuleFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{{i32 {}, !\"{}\", ", self.behavior, self.key)?;
        match &self.value {
            FlagValue::I32(v) => write!(f, "i32 {v}")?,
            FlagValue::Bool(v) => write!(f, "i1 {v}")?,
            FlagValue::Strings(items) => {
                let items: Vec<String> = items.iter().map(|s| format!("!\"{s}\"")).collect();
                write!(f, "!{{{}}}", items.join(", "))?;
            }
        }
        write!(f, "}}")
    }
}

/// A complete QIR module.
///
/// Declarations are kept sorted by name and attribute groups by id, so two
/// modules built by the same sequence of calls print identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    name: String,
    opaque_types: Vec<String>,
    functions: Vec<Function>,
    declarations: BTreeMap<String, Declaration>,
    attribute_groups: BTreeMap<u32, Vec<Attribute>>,
    flags: Vec<ModuleFlag>,
}

impl Module {
    /// Create an empty module with the `%Qubit` and `%Result` opaque types.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opaque_types: vec!["Qubit".into(), "Result".into()],
            functions: Vec::new(),
            declarations: BTreeMap::new(),
            attribute_groups: BTreeMap::new(),
            flags: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ensure an opaque struct type such as `Array` is declared.
    pub fn add_opaque_type(&mut self, name: &str) {
        if !self.opaque_types.iter().any(|t| t == name) {
            self.opaque_types.push(name.to_string());
        }
    }

    /// Add a function definition.
    pub fn add_function(&mut self, function: Function) -> IrResult<()> {
        if self.function(&function.name).is_some() {
            return Err(IrError::DuplicateFunction(function.name));
        }
        self.functions.push(function);
        Ok(())
    }

    /// Declare an external function. Redeclaring with the same signature is a no-op.
    pub fn declare(
        &mut self,
        name: &str,
        ret: Type,
        params: Vec<Type>,
        attributes: Option<u32>,
    ) -> IrResult<()> {
        let decl = Declaration {
            name: name.to_string(),
            ret,
            params,
            attributes,
        };
        match self.declarations.get(name) {
            Some(existing) if *existing != decl => {
                Err(IrError::ConflictingDeclaration(name.to_string()))
            }
            Some(_) => Ok(()),
            None => {
                self.declarations.insert(name.to_string(), decl);
                Ok(())
            }
        }
    }

    /// Define (or replace) attribute group `#id`.
    pub fn set_attribute_group(&mut self, id: u32, attrs: Vec<Attribute>) {
        self.attribute_groups.insert(id, attrs);
    }

    pub fn add_flag(&mut self, flag: ModuleFlag) {
        self.flags.push(flag);
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> + '_ {
        self.declarations.values()
    }

    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations.get(name)
    }

    pub fn attribute_group(&self, id: u32) -> Option<&[Attribute]> {
        self.attribute_groups.get(&id).map(Vec::as_slice)
    }

    pub fn flags(&self) -> &[ModuleFlag] {
        &self.flags
    }

    /// Look up a string attribute such as `required_num_qubits` on group `#id`.
    pub fn attribute_value(&self, id: u32, key: &str) -> Option<&str> {
        self.attribute_group(id)?.iter().find_map(|a| match a {
            Attribute::Pair(k, v) if k == key => Some(v.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "source_filename = \"{}\"", self.name)?;
        writeln!(f)?;

        for ty in &self.opaque_types {
            writeln!(f, "%{ty} = type opaque")?;
        }

        for function in &self.functions {
            writeln!(f)?;
            writeln!(f, "{function}")?;
        }

        if !self.declarations.is_empty() {
            writeln!(f)?;
            for decl in self.declarations.values() {
                writeln!(f, "{decl}")?;
            }
        }

        if !self.attribute_groups.is_empty() {
            writeln!(f)?;
            for (id, attrs) in &self.attribute_groups {
                let attrs: Vec<String> = attrs.iter().map(ToString::to_string).collect();
                writeln!(f, "attributes #{id} = {{ {} }}", attrs.join(" "))?;
            }
        }

        if !self.flags.is_empty() {
            writeln!(f)?;
            let refs: Vec<String> = (0..self.flags.len()).map(|i| format!("!{i}")).collect();
            writeln!(f, "!llvm.module.flags = !{{{}}}", refs.join(", "))?;
            writeln!(f)?;
            for (i, flag) in self.flags.iter().enumerate() {
                writeln!(f, "!{i} = {flag}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicting_declaration() {
        let mut module = Module::new("m");
        module
            .declare("__quantum__qis__h__body", Type::Void, vec![Type::Qubit], None)
            .unwrap();
        module
            .declare("__quantum__qis__h__body", Type::Void, vec![Type::Qubit], None)
            .unwrap();
        let err = module
            .declare("__quantum__qis__h__body", Type::Void, vec![Type::Result], None)
            .unwrap_err();
        assert!(matches!(err, IrError::ConflictingDeclaration(_)));
    }

    #[test]
    fn test_declarations_sorted() {
        let mut module = Module::new("m");
        module
            .declare("__quantum__qis__x__body", Type::Void, vec![Type::Qubit], None)
            .unwrap();
        module
            .declare("__quantum__qis__h__body", Type::Void, vec![Type::Qubit], None)
            .unwrap();
        let text = module.to_string();
        let h = text.find("__quantum__qis__h__body").unwrap();
        let x = text.find("__quantum__qis__x__body").unwrap();
        assert!(h < x);
    }

    #[test]
    fn test_flag_display() {
        let flag = ModuleFlag::new(5, "int_computations", FlagValue::Strings(vec!["i64".into()]));
        assert_eq!(flag.to_string(), "!{i32 5, !\"int_computations\", !{!\"i64\"}}");
        let flag = ModuleFlag::new(1, "dynamic_qubit_management", FlagValue::Bool(false));
        assert_eq!(
            flag.to_string(),
            "!{i32 1, !\"dynamic_qubit_management\", i1 false}"
        );
    }

    #[test]
    fn test_attribute_lookup() {
        let mut module = Module::new("m");
        module.set_attribute_group(
            0,
            vec![
                Attribute::Flag("entry_point".into()),
                Attribute::Pair("required_num_qubits".into(), "2".into()),
            ],
        );
        assert_eq!(module.attribute_value(0, "required_num_qubits"), Some("2"));
        assert_eq!(module.attribute_value(0, "entry_point"), None);
        assert!(module.to_string().contains(
            "attributes #0 = { \"entry_point\" \"required_num_qubits\"=\"2\" }"
        ));
    }
}
