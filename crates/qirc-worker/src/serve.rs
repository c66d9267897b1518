//! The worker side of the protocol.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{error, info, instrument, warn};

use qirc_compile::generate_ir;

use crate::error::WorkerResult;
use crate::protocol::{Outcome, Request, Response, decode_request, encode_line};

/// Compile one request in the current process.
#[instrument(skip(request), fields(id = %request.id, source = %request.source_name, profile = %request.profile))]
pub fn handle(request: &Request) -> Response {
    let outcome = match generate_ir(&request.source_name, &request.source, request.profile) {
        Ok(ir) => Outcome::Ir(ir),
        Err(err) => {
            if err.is_unimplemented() {
                error!("codegen gap: {err}");
            } else {
                info!("compilation rejected: {err}");
            }
            Outcome::Error(err)
        }
    };
    Response {
        id: request.id,
        outcome,
    }
}

/// Read one request from `reader`, compile it and write the response.
///
/// Returns `false` if the reader was closed before a request arrived.
pub async fn serve<R, W>(mut reader: R, mut writer: W) -> WorkerResult<bool>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        warn!("input closed before a request arrived");
        return Ok(false);
    }
    let request = decode_request(&line)?;
    let response = handle(&request);
    writer.write_all(&encode_line(&response)?).await?;
    writer.flush().await?;
    Ok(true)
}

/// Serve one request on the process's stdin and stdout.
pub async fn serve_stdio() -> WorkerResult<bool> {
    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}
