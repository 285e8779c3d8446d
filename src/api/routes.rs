//! API Routes
//!
//! HTTP endpoint definitions.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Account, Transaction, TransactionType};
use crate::error::AppError;
use crate::handlers::{AccountHandler, CreateAccountCommand, LedgerHandler, TransactionCommand};

/// Shared handler instances
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountHandler>,
    pub ledger: Arc<LedgerHandler>,
}

impl AppState {
    pub fn new(accounts: Arc<AccountHandler>, ledger: Arc<LedgerHandler>) -> Self {
        Self { accounts, ledger }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub account_holder_id: Uuid,
}

/// Amount as sent by clients: a decimal string or a JSON number
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn into_string(self) -> String {
        match self {
            AmountInput::Text(s) => s,
            AmountInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionRequest {
    pub amount: AmountInput,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub account_number: String,
    pub account_holder_id: Uuid,
    pub balance: String,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            account_number: account.account_number.to_string(),
            account_holder_id: account.account_holder_id,
            balance: account.balance.to_string(),
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: String,
    pub transaction_type: TransactionType,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
}

impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            account_id: transaction.account_id,
            amount: transaction.amount.to_string(),
            transaction_type: transaction.transaction_type,
            timestamp: transaction.timestamp,
            description: transaction.description,
        }
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/bank-accounts", post(create_account))
        // GET looks up by holder id, DELETE by account id
        .route("/bank-accounts/:id", get(get_account_by_holder).delete(delete_account))
        .route("/bank-accounts/:id/details", get(get_account_details))
        .route("/bank-accounts/:id/deposit", patch(deposit))
        .route("/bank-accounts/:id/withdraw", patch(withdraw))
        .route("/account-numbers/:account_number", get(get_account_by_number))
        .route("/bank-transactions/:account_id/transactions", get(get_transactions))
}

// =========================================================================
// Accounts
// =========================================================================

/// Open an account for a holder
async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let account = state
        .accounts
        .create_account(CreateAccountCommand::new(request.account_holder_id))
        .await?;

    Ok((StatusCode::CREATED, Json(account.into())))
}

async fn get_account_by_holder(
    State(state): State<AppState>,
    Path(holder_id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state.accounts.get_account_by_holder_id(holder_id).await?;
    Ok(Json(account.into()))
}

async fn get_account_details(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state.accounts.get_account_by_id(account_id).await?;
    Ok(Json(account.into()))
}

async fn get_account_by_number(
    State(state): State<AppState>,
    Path(account_number): Path<String>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state.accounts.get_account_by_number(&account_number).await?;
    Ok(Json(account.into()))
}

async fn delete_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.accounts.delete_account(account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =========================================================================
// Ledger
// =========================================================================

fn transaction_command(account_id: Uuid, request: TransactionRequest) -> TransactionCommand {
    let command = TransactionCommand::new(account_id, request.amount.into_string());
    match request.description {
        Some(description) => command.with_description(description),
        None => command,
    }
}

async fn deposit(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<TransactionRequest>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .ledger
        .deposit(transaction_command(account_id, request))
        .await?;
    Ok(Json(account.into()))
}

async fn withdraw(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<TransactionRequest>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .ledger
        .withdraw(transaction_command(account_id, request))
        .await?;
    Ok(Json(account.into()))
}

async fn get_transactions(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let transactions = state.ledger.get_transactions(account_id).await?;
    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_input_accepts_string_and_number() {
        let text: TransactionRequest = serde_json::from_str(r#"{"amount": "12.50"}"#).unwrap();
        assert_eq!(text.amount.into_string(), "12.50");

        let number: TransactionRequest =
            serde_json::from_str(r#"{"amount": 12.5, "description": "atm"}"#).unwrap();
        assert_eq!(number.amount.into_string(), "12.5");
        assert_eq!(number.description.as_deref(), Some("atm"));
    }

    #[test]
    fn test_account_response_formats_balance() {
        let account = Account::open(Uuid::new_v4(), "1234567890".parse().unwrap());
        let response = AccountResponse::from(account);

        assert_eq!(response.balance, "0.00");
        assert_eq!(response.account_number, "1234567890");
    }
}
