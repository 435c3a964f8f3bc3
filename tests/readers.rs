mod common;

use common::fast_config;
use rustchase::BrokerSession;
use rustchase::application::readers::account_details;
use rustchase::application::retry::RetryPolicy;
use rustchase::config::EndpointConfig;
use rustchase::domain::browser::CapturedResponse;
use rustchase::domain::errors::FetchError;
use rustchase::domain::selector::Selector;
use rustchase::infrastructure::mock::{PageCall, ScriptedPage};
use serde_json::{Value, json};

const LOOKUP: &str = "#equitySymbolLookup-block-autocomplete-validate-input-field";

fn accounts_envelope() -> Value {
    json!({"cache": [
        {"url": "/svc/rr/accounts/secure/v1/dashboard/tiles/list", "response": {"tiles": []}},
        {"url": "/svc/rr/accounts/secure/v1/account/detail/inv/list", "response": {
            "chaseInvestments": {
                "investmentSummary": {"accountValue": "1000.50", "accountValueChange": -2.5},
                "accounts": [
                    {"accountId": 123456789, "mask": "6789", "nickname": "Brokerage",
                     "detailType": "BRK", "accountValue": 1000.5, "eda": "true"}
                ]
            }
        }}
    ]})
}

fn quote_body() -> Value {
    json!({
        "askPriceAmount": 31.25,
        "askQuantity": 300,
        "bidPriceAmount": "31.20",
        "bidQuantity": "200",
        "changeAmount": -0.15,
        "lastTradePriceAmount": 31.22,
        "lastTradeQuantity": 100,
        "changePercent": -0.48,
        "asOfTimestamp": "2024-03-15T14:30:05.123Z",
        "securitySymbolCode": "INTC"
    })
}

async fn open(page: &ScriptedPage, dir: &std::path::Path) -> BrokerSession<ScriptedPage> {
    BrokerSession::open(page.clone(), fast_config(dir)).await.unwrap()
}

#[tokio::test]
async fn test_positions_envelope_yields_position_value() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints = EndpointConfig::default();
    let body = json!({"cache": [{"url": "/positions", "response": {
        "positions": [{"instrumentLongName": "X", "marketValue": {"baseValueAmount": 500.0}}]
    }}]});
    let page = ScriptedPage::new("about:blank")
        .respond(CapturedResponse::json_ok(endpoints.holdings_json.clone(), &body));
    let session = open(&page, dir.path()).await;

    let holdings = session.fetch_holdings("123456789").await.unwrap().unwrap();

    assert_eq!(holdings.positions.len(), 1);
    assert_eq!(holdings.positions[0].value(), Some(500.0));
    assert_eq!(holdings.positions[0].display_name().as_deref(), Some("X"));
    assert_eq!(
        page.calls()[1],
        PageCall::Goto(endpoints.account_holdings_url("123456789"))
    );
}

#[tokio::test]
async fn test_accounts_are_read_identically_twice() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints = EndpointConfig::default();
    let url = endpoints.account_info[0].clone();
    let page = ScriptedPage::new("about:blank")
        .respond(CapturedResponse::json_ok(url.clone(), &accounts_envelope()))
        .respond(CapturedResponse::json_ok(url, &accounts_envelope()));
    let session = open(&page, dir.path()).await;

    let first = session.fetch_accounts().await.unwrap().unwrap();
    let second = session.fetch_accounts().await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.total_value, Some(1000.5));
    assert_eq!(first.account_ids(), vec!["123456789"]);
    assert_eq!(first.connectors()["123456789"], "6789");

    let account = account_details(&first, "123456789").unwrap();
    assert_eq!(account.nickname, "Brokerage");
    assert!(account.eda);
    assert!(account_details(&first, "000").is_none());
}

#[tokio::test]
async fn test_accounts_fall_back_to_second_dashboard_url() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints = EndpointConfig::default();
    let page = ScriptedPage::new("about:blank").silent().respond(CapturedResponse::json_ok(
        endpoints.account_info[1].clone(),
        &accounts_envelope(),
    ));
    let mut config = fast_config(dir.path());
    config.retry = RetryPolicy::no_retry();
    let session = BrokerSession::open(page.clone(), config).await.unwrap();

    let overview = session.fetch_accounts().await.unwrap();
    assert_eq!(overview.map(|o| o.accounts.len()), Some(1));
}

#[tokio::test]
async fn test_quote_after_symbol_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints = EndpointConfig::default();
    let page = ScriptedPage::new("about:blank")
        .show(Selector::label("Buy"))
        .show(Selector::css(LOOKUP))
        .respond(CapturedResponse::json_ok(endpoints.quote_url("INTC"), &quote_body()));
    let session = open(&page, dir.path()).await;

    let quote = session.fetch_quote("123456789", "INTC").await.unwrap();

    assert_eq!(quote.symbol, "INTC");
    assert_eq!(quote.ask_quantity, 300);
    assert_eq!(page.value_of(&Selector::css(LOOKUP)).as_deref(), Some("INTC"));
}

#[tokio::test]
async fn test_missing_quote_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let page = ScriptedPage::new("about:blank")
        .show(Selector::label("Buy"))
        .show(Selector::css(LOOKUP))
        .silent()
        .silent()
        .silent();
    let session = open(&page, dir.path()).await;

    let err = session.fetch_quote("123456789", "INTC").await.unwrap_err();
    assert!(matches!(err, FetchError::NoData { ref what } if what == "quote for INTC"));
    assert_eq!(page.remaining_deliveries(), 0);
}

#[tokio::test]
async fn test_order_statuses_from_bare_response() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints = EndpointConfig::default();
    let body = json!({"orderSummaries": [
        {"orderIdentifier": 555001, "tradeActionCode": "BUY", "orderStatusCode": "FILLED",
         "securitySymbolCode": "INTC", "orderQuantity": "10"}
    ]});
    let page = ScriptedPage::new("about:blank")
        .respond(CapturedResponse::json_ok(format!("{}?limit=50", endpoints.order_info), &body));
    let session = open(&page, dir.path()).await;

    let statuses = session
        .fetch_order_statuses("123456789")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].order_id, "555001");
    assert_eq!(statuses[0].order_quantity, Some(10.0));
    assert_eq!(statuses[0].raw["orderStatusCode"], "FILLED");
}

#[tokio::test]
async fn test_readers_refuse_closed_session() {
    let dir = tempfile::tempdir().unwrap();
    let page = ScriptedPage::new("about:blank");
    let mut session = open(&page, dir.path()).await;
    // No login form: the attempt fails and the page is closed
    assert!(session.login("alice", "secret", "1234").await.is_err());

    let err = session.fetch_holdings("123456789").await.unwrap_err();
    assert!(matches!(err, FetchError::NotAuthenticated));
}
