use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::api::requests::{
    AdminDecisionRequest, CancelTransactionRequest, ChangePinRequest, CreateWalletRequest,
    DepositRequest, ListCancellationRequestsQuery, ListTransactionsQuery, ListWalletsQuery,
    TransferRequest, UpdateStatusRequest, WithdrawRequest,
};
use crate::api::responses::{
    ApiResponse, ErrorResponse, PaginatedResponse, ValidationErrorDetail, WalletResponse,
};
use crate::error::{AppError, ErrorKind};
use crate::models::{Caller, CancellationRequest, TransactionView};
use crate::observability::AggregatedHealth;
use crate::services::{CancellationOutcome, LedgerReceipt, ReconciliationReport};

use super::routes::AppState;

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// Maps a service error to its HTTP status and envelope.
pub fn error_response(error: AppError) -> ApiError {
    let kind = error.kind();
    let status = match (&error, kind) {
        (AppError::LockTimeout(_), _) => StatusCode::SERVICE_UNAVAILABLE,
        (_, ErrorKind::ValidationError) => StatusCode::BAD_REQUEST,
        (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        (_, ErrorKind::StateConflict) => StatusCode::CONFLICT,
        (_, ErrorKind::AuthorizationDenied) => StatusCode::FORBIDDEN,
        (_, ErrorKind::InsufficientFunds) => StatusCode::UNPROCESSABLE_ENTITY,
        (_, ErrorKind::InternalFailure) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if kind == ErrorKind::InternalFailure {
        tracing::error!(error = %error, "Request failed");
    }

    (
        status,
        Json(ApiResponse::<()>::error(ErrorResponse::new(
            kind.code(),
            error.public_message(),
        ))),
    )
}

fn validation_failed(errors: &ValidationErrors) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(
            ErrorResponse::new(ErrorKind::ValidationError.code(), "Request validation failed")
                .with_details(ValidationErrorDetail::from_errors(errors)),
        )),
    )
}

fn ok<T>(status: StatusCode, data: T) -> ApiResult<T> {
    Ok((status, Json(ApiResponse::success(data))))
}

// Health

/// Aggregated health of the service and its store.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<AggregatedHealth>>) {
    let health = state.health_checker.check_all().await;
    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(ApiResponse::success(health)))
}

pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn liveness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus exposition of every recorded metric.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics are disabled".to_string()),
    }
}

// Wallets

pub async fn create_wallet(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<CreateWalletRequest>,
) -> ApiResult<WalletResponse> {
    request.validate().map_err(|e| validation_failed(&e))?;

    let wallet = state
        .wallets
        .create_wallet(&caller, &request.pin, &request.currency)
        .await
        .map_err(error_response)?;

    ok(StatusCode::CREATED, WalletResponse::from(wallet))
}

pub async fn list_wallets(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ListWalletsQuery>,
) -> ApiResult<PaginatedResponse<WalletResponse>> {
    let filter = query.into_filter().map_err(error_response)?;
    let page = state
        .wallets
        .list_wallets(&caller, filter)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, page.map(WalletResponse::from).into())
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<WalletResponse> {
    let wallet = state
        .wallets
        .get_wallet(&caller, id)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, WalletResponse::from(wallet))
}

pub async fn change_pin(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChangePinRequest>,
) -> ApiResult<()> {
    request.validate().map_err(|e| validation_failed(&e))?;

    state
        .wallets
        .change_pin(&caller, id, &request.current_pin, &request.new_pin)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, ())
}

pub async fn update_wallet_status(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<WalletResponse> {
    let wallet = state
        .wallets
        .set_status(&caller, id, request.status)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, WalletResponse::from(wallet))
}

pub async fn delete_wallet(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .wallets
        .delete_wallet(&caller, id)
        .await
        .map_err(error_response)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn reconcile_wallet(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<ReconciliationReport> {
    let report = state
        .wallets
        .reconcile(&caller, id)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, report)
}

// Ledger

pub async fn deposit(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(request): Json<DepositRequest>,
) -> ApiResult<LedgerReceipt> {
    request.validate().map_err(|e| validation_failed(&e))?;

    let receipt = state
        .ledger
        .deposit(&caller, id, request.amount, request.description.as_deref())
        .await
        .map_err(error_response)?;

    ok(StatusCode::CREATED, receipt)
}

pub async fn withdraw(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(request): Json<WithdrawRequest>,
) -> ApiResult<LedgerReceipt> {
    request.validate().map_err(|e| validation_failed(&e))?;

    let receipt = state
        .ledger
        .withdraw(&caller, id, request.amount, &request.pin, request.description.as_deref())
        .await
        .map_err(error_response)?;

    ok(StatusCode::CREATED, receipt)
}

pub async fn transfer(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<LedgerReceipt> {
    request.validate().map_err(|e| validation_failed(&e))?;

    let receipt = state
        .ledger
        .transfer(
            &caller,
            id,
            request.recipient_wallet_id,
            request.amount,
            &request.pin,
            request.description.as_deref(),
        )
        .await
        .map_err(error_response)?;

    ok(StatusCode::CREATED, receipt)
}

pub async fn list_wallet_transactions(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListTransactionsQuery>,
) -> ApiResult<PaginatedResponse<TransactionView>> {
    let page = state
        .ledger
        .transaction_history(&caller, id, query.into_filter())
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, page.into())
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransactionView> {
    let tx = state
        .ledger
        .get_transaction(&caller, id)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, tx)
}

// Cancellations

pub async fn request_cancellation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelTransactionRequest>,
) -> ApiResult<CancellationRequest> {
    request.validate().map_err(|e| validation_failed(&e))?;

    let created = state
        .cancellations
        .request_cancellation(&caller, id, &request.reason)
        .await
        .map_err(error_response)?;

    ok(StatusCode::CREATED, created)
}

pub async fn list_cancellation_requests(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ListCancellationRequestsQuery>,
) -> ApiResult<PaginatedResponse<CancellationRequest>> {
    let page = state
        .cancellations
        .list_requests(&caller, query.into_filter())
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, page.into())
}

pub async fn get_cancellation_request(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<CancellationRequest> {
    let request = state
        .cancellations
        .get_request(&caller, id)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, request)
}

pub async fn approve_cancellation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(request): Json<AdminDecisionRequest>,
) -> ApiResult<CancellationOutcome> {
    request.validate().map_err(|e| validation_failed(&e))?;

    let outcome = state
        .cancellations
        .approve(&caller, id, &request.reason)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, outcome)
}

pub async fn reject_cancellation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    Json(request): Json<AdminDecisionRequest>,
) -> ApiResult<CancellationRequest> {
    request.validate().map_err(|e| validation_failed(&e))?;

    let rejected = state
        .cancellations
        .reject(&caller, id, &request.reason)
        .await
        .map_err(error_response)?;

    ok(StatusCode::OK, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_status_mapping() {
        let id = Uuid::new_v4();
        let cases = [
            (AppError::SelfTransfer, StatusCode::BAD_REQUEST),
            (AppError::WalletNotFound(id), StatusCode::NOT_FOUND),
            (AppError::DuplicateCancellationRequest(id), StatusCode::CONFLICT),
            (AppError::AdminRequired, StatusCode::FORBIDDEN),
            (
                AppError::InsufficientFunds {
                    requested: dec!(10),
                    available: dec!(1),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AppError::LockTimeout(id), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Internal("boom".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error_response(error).0, expected);
        }
    }

    #[test]
    fn test_internal_error_body_is_generic() {
        let (_, Json(body)) = error_response(AppError::Internal("disk on fire".to_string()));
        let error = body.error.unwrap();
        assert_eq!(error.code, "INTERNAL_ERROR");
        assert!(!error.message.contains("disk"));
    }
}
