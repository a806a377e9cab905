//! OpenAPI document generation for `goProbe --openapi.spec-outfile` (spec.md
//! §6, SPEC_FULL.md §10.4).

use utoipa::OpenApi;

use crate::query::types::{
    Hits, HostStatus, QueryArgs, QueryResult, QueryStatus, Row, RowCounters, RowKey, StatusCode,
    StreamEvent, Summary,
};

#[derive(OpenApi)]
#[openapi(
    paths(),
    components(schemas(
        QueryArgs,
        QueryResult,
        QueryStatus,
        StatusCode,
        Row,
        RowKey,
        RowCounters,
        Summary,
        Hits,
        HostStatus,
        StreamEvent
    )),
    tags((name = "goprobe", description = "Distributed flow query API"))
)]
pub struct ApiDoc;

pub fn document() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
