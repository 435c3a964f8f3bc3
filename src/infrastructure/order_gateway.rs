use crate::config::EndpointConfig;
use crate::domain::browser::StoredCookie;
use crate::domain::errors::OrderError;
use crate::domain::order::{ExecutionReply, OrderPayload, ValidationReply, error_notices};
use crate::domain::ports::OrderGateway;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, ORIGIN, REFERER};
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

const EXCHANGE_ID_FIELD: &str = "financialInformationExchangeSystemOrderIdentifier";

/// `OrderGateway` speaking to the trade endpoints with the browser session's
/// cookies.
pub struct HttpOrderGateway {
    validate_client: ClientWithMiddleware,
    execute_client: ClientWithMiddleware,
    validate_url: String,
    execute_url: String,
    origin: String,
    referer: String,
    cookie_header: String,
}

impl HttpOrderGateway {
    pub fn new(
        endpoints: &EndpointConfig,
        cookies: &[StoredCookie],
        user_agent: &str,
    ) -> Result<Self, OrderError> {
        let validate = Url::parse(&endpoints.order_validate)
            .map_err(|e| OrderError::Transport(format!("invalid validate URL: {}", e)))?;
        let host = validate.host_str().unwrap_or_default().to_string();

        let cookie_header = cookie_header(cookies, &host);
        if cookie_header.is_empty() {
            return Err(OrderError::NotAuthenticated);
        }

        Ok(Self {
            // Validation is idempotent; execution is never replayed
            validate_client: HttpClientFactory::create_client(user_agent, 2),
            execute_client: HttpClientFactory::create_client(user_agent, 0),
            validate_url: endpoints.order_validate.clone(),
            execute_url: endpoints.order_execute.clone(),
            origin: validate.origin().ascii_serialization(),
            referer: endpoints.landing_page.clone(),
            cookie_header,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        client: &ClientWithMiddleware,
        url: &str,
        body: &Value,
    ) -> Result<T, OrderError> {
        let response = client
            .post(url)
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(CONTENT_TYPE, "application/json")
            .header(ORIGIN, &self.origin)
            .header(REFERER, &self.referer)
            .header(COOKIE, &self.cookie_header)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| OrderError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OrderError::Transport(e.to_string()))?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(OrderError::NotAuthenticated);
        }
        debug!("{} -> {}", url, status);

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| OrderError::Decode(e.to_string()));
        }

        // Rejections come back as 4xx with the usual message list; anything
        // else from a failed status is the endpoint's own error.
        let rejection = serde_json::from_str::<Value>(&text)
            .ok()
            .filter(|body| status.is_client_error() && !error_notices(body).is_empty());
        match rejection {
            Some(body) => serde_json::from_value(body).map_err(|e| OrderError::Decode(e.to_string())),
            None => Err(OrderError::Gateway {
                endpoint: url.to_string(),
                status: status.as_u16(),
                body: text,
            }),
        }
    }
}

/// `name=value` pairs of the cookies sent to `host`.
fn cookie_header(cookies: &[StoredCookie], host: &str) -> String {
    cookies
        .iter()
        .filter(|c| c.applies_to(host))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn execution_body(payload: &OrderPayload, exchange_order_id: &str) -> Result<Value, OrderError> {
    let mut body = serde_json::to_value(payload).map_err(|e| OrderError::Decode(e.to_string()))?;
    if let Some(map) = body.as_object_mut() {
        map.insert(
            EXCHANGE_ID_FIELD.to_string(),
            Value::String(exchange_order_id.to_string()),
        );
    }
    Ok(body)
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    async fn validate(&self, payload: &OrderPayload) -> Result<ValidationReply, OrderError> {
        let body = serde_json::to_value(payload).map_err(|e| OrderError::Decode(e.to_string()))?;
        info!(
            "Validating {} {} x{}",
            payload.trade_action_code, payload.security_symbol_code, payload.order_quantity
        );
        self.post(&self.validate_client, &self.validate_url, &body)
            .await
    }

    async fn execute(
        &self,
        payload: &OrderPayload,
        exchange_order_id: &str,
    ) -> Result<ExecutionReply, OrderError> {
        let body = execution_body(payload, exchange_order_id)?;
        info!(
            "Executing {} {} x{} ({})",
            payload.trade_action_code,
            payload.security_symbol_code,
            payload.order_quantity,
            exchange_order_id
        );
        self.post(&self.execute_client, &self.execute_url, &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::order_api::ApiOrderPlacer;
    use crate::domain::order::{MessageLabel, OrderRequest, OrderSide, OrderStage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Route = (&'static str, u16, &'static str);

    /// Reads one request, headers and body, so closing never resets the peer.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Local order endpoints answering each path with a canned status and body.
    async fn serve(routes: Vec<Route>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    continue;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut stream).await;
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = routes
                        .iter()
                        .find(|(route, _, _)| *route == path)
                        .map(|(_, status, body)| (*status, *body))
                        .unwrap_or((404, ""));
                    let response = format!(
                        "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    async fn local_gateway(routes: Vec<Route>) -> HttpOrderGateway {
        let base = serve(routes).await;
        let endpoints = EndpointConfig {
            order_validate: format!("{}/validate", base),
            order_execute: format!("{}/execute", base),
            ..EndpointConfig::default()
        };
        HttpOrderGateway::new(&endpoints, &[cookie("session", "127.0.0.1")], "ua").unwrap()
    }

    fn dry_buy() -> OrderRequest {
        OrderRequest::market("123456789", "INTC", OrderSide::Buy, 10)
    }

    fn live_buy() -> OrderRequest {
        dry_buy().live()
    }

    fn cookie(name: &str, domain: &str) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: format!("{}-v", name),
            domain: domain.to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: false,
            secure: true,
            same_site: None,
        }
    }

    #[test]
    fn test_cookie_header_filters_by_host() {
        let cookies = vec![
            cookie("a", ".chase.com"),
            cookie("b", "other.example"),
            cookie("c", "secure.chase.com"),
        ];
        assert_eq!(
            cookie_header(&cookies, "secure.chase.com"),
            "a=a-v; c=c-v"
        );
    }

    #[test]
    fn test_gateway_requires_session_cookies() {
        let endpoints = EndpointConfig::default();
        let result = HttpOrderGateway::new(&endpoints, &[cookie("x", "other.example")], "ua");
        assert!(matches!(result, Err(OrderError::NotAuthenticated)));

        let ok = HttpOrderGateway::new(&endpoints, &[cookie("s", ".chase.com")], "ua");
        assert!(ok.is_ok());
    }

    #[test]
    fn test_execution_body_carries_exchange_id() {
        let request = OrderRequest::market("1", "intc", OrderSide::Buy, 1);
        let body = execution_body(&OrderPayload::from(&request), "FIX-9").unwrap();
        assert_eq!(body[EXCHANGE_ID_FIELD], "FIX-9");
        assert_eq!(body["securitySymbolCode"], "INTC");
    }

    #[tokio::test]
    async fn test_not_found_without_messages_is_a_gateway_error() {
        let gateway = local_gateway(vec![("/validate", 404, r#"{"error":"Not Found"}"#)]).await;

        let err = ApiOrderPlacer::new(&gateway)
            .place(&dry_buy())
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Gateway { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_rejected_execution_is_not_reported_as_placed() {
        let gateway = local_gateway(vec![
            ("/validate", 200, r#"{"exchangeOrderIdentifier":"X-1"}"#),
            ("/execute", 400, r#"{"error":"rejected"}"#),
        ])
        .await;

        let err = ApiOrderPlacer::new(&gateway)
            .place(&live_buy())
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Gateway { status: 400, ref body, .. } if body.contains("rejected")));
    }

    #[tokio::test]
    async fn test_client_error_with_messages_is_an_invalid_order() {
        let gateway = local_gateway(vec![(
            "/validate",
            400,
            r#"{"orderMessages":[{"code":"E102","message":"Insufficient buying power","severity":"ERROR"}]}"#,
        )])
        .await;

        let result = ApiOrderPlacer::new(&gateway).place(&live_buy()).await.unwrap();

        assert_eq!(result.stage, OrderStage::Invalid);
        assert_eq!(
            result.message(MessageLabel::OrderInvalid),
            Some("Insufficient buying power (E102)")
        );
    }

    #[tokio::test]
    async fn test_execution_rejection_with_messages_is_unconfirmed() {
        let gateway = local_gateway(vec![
            ("/validate", 200, r#"{"exchangeOrderIdentifier":"X-1"}"#),
            ("/execute", 422, r#"{"messages":[{"message":"Market closed"}]}"#),
        ])
        .await;

        let result = ApiOrderPlacer::new(&gateway).place(&live_buy()).await.unwrap();

        assert_eq!(result.stage, OrderStage::Unconfirmed);
        assert!(!result.is_confirmed());
        assert_eq!(
            result.message(MessageLabel::OrderConfirmation),
            Some("Market closed")
        );
    }

    #[tokio::test]
    async fn test_server_error_is_a_gateway_error() {
        let gateway = local_gateway(vec![
            ("/validate", 200, r#"{"exchangeOrderIdentifier":"X-1"}"#),
            ("/execute", 503, r#"{"orderMessages":[{"message":"Try later"}]}"#),
        ])
        .await;

        let err = ApiOrderPlacer::new(&gateway)
            .place(&live_buy())
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Gateway { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_non_json_success_body_is_a_decode_error() {
        let gateway = local_gateway(vec![("/validate", 200, "<html>maintenance</html>")]).await;

        let err = ApiOrderPlacer::new(&gateway)
            .place(&live_buy())
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unrelated_success_body_is_a_decode_error() {
        let gateway = local_gateway(vec![("/validate", 200, r#"{"error":"Not Found"}"#)]).await;

        let err = ApiOrderPlacer::new(&gateway)
            .place(&dry_buy())
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Decode(_)));
    }
}
