//! Supervisor RPC handler
//!
//! Implements the stdin/stdout JSON handler behind `golden-sd rpc`:
//!
//!   echo '{"protocol_version":1,"op":"status",...}' | golden-sd rpc
//!
//! The handler reads a single JSON request line, dispatches it to the
//! operation handler and writes a single JSON response line. Long-running
//! work never happens here; it is handed to detached workers.

use std::io::{self, BufRead, Write};

use gsd_protocol::{ops::names, RpcError, RpcRequest, RpcResponse, PROTOCOL_MAX, PROTOCOL_MIN};
use tracing::{debug, warn};

use crate::appliance::Appliance;
use crate::handlers;

/// Response version used when the request could not be parsed.
const UNPARSED_PROTOCOL_VERSION: i32 = 0;

/// Main RPC handler for the supervisor.
pub struct RpcHandler {
    appliance: Appliance,
}

impl RpcHandler {
    pub fn new(appliance: Appliance) -> Self {
        Self { appliance }
    }

    pub fn appliance(&self) -> &Appliance {
        &self.appliance
    }

    /// Run the RPC handler, reading from stdin and writing to stdout.
    pub fn run(&self) -> io::Result<()> {
        self.run_with_io(&mut io::stdin().lock(), &mut io::stdout().lock())
    }

    /// Run the RPC handler with custom I/O.
    pub fn run_with_io<R: BufRead, W: Write>(&self, reader: &mut R, writer: &mut W) -> io::Result<()> {
        let response = match read_request(reader) {
            Ok(request) => self.handle_request(&request),
            Err(e) => RpcResponse::error(UNPARSED_PROTOCOL_VERSION, String::new(), e),
        };
        write_response(writer, &response)
    }

    /// Validate the protocol version and dispatch one request.
    pub fn handle_request(&self, request: &RpcRequest) -> RpcResponse {
        if let Err(e) = validate_protocol_version(request) {
            return RpcResponse::error(request.protocol_version, request.request_id.clone(), e);
        }
        debug!(op = %request.op, request_id = %request.request_id, "dispatching request");

        let result = self.dispatch(request);
        match result {
            Ok(payload) => RpcResponse::success(request.protocol_version, request.request_id.clone(), payload),
            Err(e) => {
                warn!(op = %request.op, code = %e.code, message = %e.message, "request rejected");
                RpcResponse::error(request.protocol_version, request.request_id.clone(), e)
            }
        }
    }

    fn dispatch(&self, request: &RpcRequest) -> Result<serde_json::Value, RpcError> {
        let app = &self.appliance;
        match request.op.as_str() {
            names::START_DOWNLOAD => handlers::start_download::handle(request, app),
            names::STATUS => handlers::status::handle(request, app),
            names::TAIL => handlers::tail::handle(request, app),
            names::ARM => handlers::arm::handle(request, app),
            names::ARM_STATUS => handlers::arm_status::handle(request, app),
            names::DISARM => handlers::disarm::handle(request, app),
            names::FLASH => handlers::flash::handle(request, app),
            names::TARGETS => handlers::targets::handle(request, app),
            names::PLAN_FLASH => handlers::plan_flash::handle(request, app),
            names::SAFETY => handlers::safety::handle(request, app),
            names::OS => handlers::os::handle(request, app),
            _ => Err(RpcError::unknown_operation(&request.op)),
        }
    }
}

fn read_request<R: BufRead>(reader: &mut R) -> Result<RpcRequest, RpcError> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| RpcError::invalid_request(format!("failed to read request: {}", e)))?;
    serde_json::from_str(&line).map_err(|e| RpcError::invalid_request(format!("invalid JSON: {}", e)))
}

fn validate_protocol_version(request: &RpcRequest) -> Result<(), RpcError> {
    if request.protocol_version < PROTOCOL_MIN || request.protocol_version > PROTOCOL_MAX {
        return Err(RpcError::unsupported_protocol(
            request.protocol_version,
            PROTOCOL_MIN,
            PROTOCOL_MAX,
        ));
    }
    Ok(())
}

/// Write one response line and flush.
pub fn write_response<W: Write>(writer: &mut W, response: &RpcResponse) -> io::Result<()> {
    let json = serde_json::to_string(response).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)?;
    writer.flush()
}
