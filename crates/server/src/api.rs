use std::str::FromStr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use signflow_core::{
    ActionOutcome, ApprovalError, BoxKind, DocumentDetail, DraftPayload, ErrorKind, HomeSummary,
    LineAction, ListEntry, ListQuery, Page, SignNo, TempDocument, TempId,
};

use crate::service::{ApprovalService, RequestContext};

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const GATEWAY_TOKEN_HEADER: &str = "x-gateway-token";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    service: Arc<ApprovalService>,
    gateway_token: Option<Arc<SecretString>>,
}

impl ApiState {
    pub fn new(service: Arc<ApprovalService>, gateway_token: Option<SecretString>) -> Self {
        Self { service, gateway_token: gateway_token.map(Arc::new) }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/approval/save", post(submit))
        .route("/api/approval/temp-save", post(save_temp))
        .route("/api/approval/temp/delete", post(delete_temp))
        .route("/api/approval/temp/{temp_id}", get(load_temp))
        .route("/api/approval/line/act", post(act))
        .route("/api/approval/line/resume", post(resume))
        .route("/api/approval/line/reassign", post(reassign))
        .route("/api/approval/detail", get(detail))
        .route("/api/approval/list/{box_kind}", get(list))
        .route("/api/approval/home", get(home))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn unauthenticated(message: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, kind: "unauthenticated", message: message.into() }
    }

    fn malformed(message: impl Into<String>) -> Self {
        ApprovalError::validation(message).into()
    }
}

impl From<ApprovalError> for ApiError {
    fn from(error: ApprovalError) -> Self {
        let kind = error.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NotAuthorizedStep | ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidState | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Store => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self { status, kind: kind.as_str(), message: error.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { ok: false, kind: self.kind, message: self.message }))
            .into_response()
    }
}

fn token_matches(provided: &str, expected: &SecretString) -> bool {
    provided.as_bytes().ct_eq(expected.expose_secret().as_bytes()).into()
}

/// Caller identity asserted by the session gateway.
pub struct Caller(pub RequestContext);

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        if let Some(expected) = &state.gateway_token {
            match header(GATEWAY_TOKEN_HEADER) {
                Some(token) if token_matches(token, expected) => {}
                _ => return Err(ApiError::unauthenticated("gateway token missing or invalid")),
            }
        }

        let actor_id = header(ACTOR_HEADER)
            .ok_or_else(|| ApiError::unauthenticated(format!("`{ACTOR_HEADER}` header is required")))?;
        let correlation_id = header(CORRELATION_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Caller(RequestContext::new(actor_id, correlation_id)))
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| ApiError::malformed(rejection.body_text()))
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params.map(|Query(params)| params).map_err(|rejection| ApiError::malformed(rejection.body_text()))
}

fn path_param<T>(param: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    param.map(|Path(param)| param).map_err(|rejection| ApiError::malformed(rejection.body_text()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedResponse {
    pub ok: bool,
    pub sign_no: SignNo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempSavedResponse {
    pub ok: bool,
    pub temp_id: TempId,
}

#[derive(Debug, Serialize)]
pub struct TempResponse {
    pub ok: bool,
    pub temp: TempDocument,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteTempRequest {
    pub ids: Vec<TempId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub ok: bool,
    pub deleted_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActRequest {
    pub sign_no: SignNo,
    pub action: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResumeRequest {
    pub sign_no: SignNo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReassignRequest {
    pub sign_no: SignNo,
    pub order_seq: u32,
    pub approver_id: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub ok: bool,
    pub message: String,
}

impl MessageResponse {
    fn from_outcome(verb: &str, outcome: &ActionOutcome) -> Self {
        Self {
            ok: true,
            message: format!(
                "line {} {verb}; document {} is {}",
                outcome.order_seq,
                outcome.document.sign_no,
                outcome.document.doc_status.as_str()
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DetailParams {
    pub sign_no: SignNo,
}

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub detail: DocumentDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListParams {
    pub field: Option<String>,
    pub q: Option<String>,
    pub period: Option<String>,
    pub urgent: Option<bool>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub page: Page<ListEntry>,
}

#[derive(Debug, Serialize)]
pub struct HomeResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub home: HomeSummary,
}

async fn submit(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    payload: Result<Json<DraftPayload>, JsonRejection>,
) -> Result<Json<SubmittedResponse>, ApiError> {
    let payload = json_body(payload)?;
    let doc = state.service.submit(&ctx, payload).await?;
    Ok(Json(SubmittedResponse { ok: true, sign_no: doc.sign_no }))
}

async fn save_temp(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    payload: Result<Json<DraftPayload>, JsonRejection>,
) -> Result<Json<TempSavedResponse>, ApiError> {
    let payload = json_body(payload)?;
    let temp = state.service.save_temp(&ctx, payload).await?;
    Ok(Json(TempSavedResponse { ok: true, temp_id: temp.temp_id }))
}

async fn load_temp(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    temp_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<TempResponse>, ApiError> {
    let temp_id = TempId(path_param(temp_id)?);
    let temp = state.service.load_temp(&ctx, temp_id).await?;
    Ok(Json(TempResponse { ok: true, temp }))
}

async fn delete_temp(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    payload: Result<Json<DeleteTempRequest>, JsonRejection>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let request = json_body(payload)?;
    let deleted_count = state.service.delete_temp(&ctx, &request.ids).await?;
    Ok(Json(DeletedResponse { ok: true, deleted_count }))
}

async fn act(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    payload: Result<Json<ActRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request = json_body(payload)?;
    let action = LineAction::from_str(&request.action)?;
    let outcome = state
        .service
        .act(&ctx, request.sign_no, action, request.comment.as_deref())
        .await?;
    let verb = match action {
        LineAction::Approve => "approved",
        LineAction::Reject => "rejected",
        LineAction::Hold => "held",
    };
    Ok(Json(MessageResponse::from_outcome(verb, &outcome)))
}

async fn resume(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    payload: Result<Json<ResumeRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request = json_body(payload)?;
    let outcome = state.service.resume(&ctx, request.sign_no).await?;
    Ok(Json(MessageResponse::from_outcome("resumed", &outcome)))
}

async fn reassign(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    payload: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request = json_body(payload)?;
    let outcome = state
        .service
        .reassign(&ctx, request.sign_no, request.order_seq, &request.approver_id)
        .await?;
    Ok(Json(MessageResponse::from_outcome("reassigned", &outcome)))
}

async fn detail(
    State(state): State<ApiState>,
    Caller(_ctx): Caller,
    params: Result<Query<DetailParams>, QueryRejection>,
) -> Result<Json<DetailResponse>, ApiError> {
    let params = query_params(params)?;
    let detail = state.service.detail(params.sign_no).await?;
    Ok(Json(DetailResponse { ok: true, detail }))
}

async fn list(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    box_kind: Result<Path<String>, PathRejection>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<PageResponse>, ApiError> {
    let kind = BoxKind::from_str(&path_param(box_kind)?)?;
    let params = query_params(params)?;
    let query = ListQuery::from_params(
        params.field.as_deref(),
        params.q.as_deref(),
        params.period.as_deref(),
        params.urgent,
        params.page,
        params.size,
        state.service.default_page_size(),
    )?;
    let page = state.service.list(&ctx, kind, &query).await?;
    Ok(Json(PageResponse { ok: true, page }))
}

async fn home(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
) -> Result<Json<HomeResponse>, ApiError> {
    let home = state.service.home(&ctx).await?;
    Ok(Json(HomeResponse { ok: true, home }))
}
