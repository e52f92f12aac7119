//! OS list operation handler.

use gsd_protocol::ops::{OsSearchRequest, OsSearchResponse};
use gsd_protocol::{RpcError, RpcRequest};

use super::{parse_payload, to_payload};
use crate::appliance::Appliance;
use crate::catalog::{normalize_query, search};

/// Handle the os operation. An empty payload lists the whole catalog.
pub fn handle(request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let req: OsSearchRequest = if request.payload.is_null() {
        OsSearchRequest::default()
    } else {
        parse_payload(request)?
    };
    let query = normalize_query(req.q.as_deref().unwrap_or(""));
    let items = search(app.catalog().items()?, &query);

    to_payload(&OsSearchResponse {
        query,
        items: items.into_iter().map(Into::into).collect(),
    })
}
