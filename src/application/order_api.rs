use crate::domain::order::{
    MessageLabel, OrderMessages, OrderPayload, OrderRequest, OrderResult, OrderStage,
};
use crate::domain::errors::OrderError;
use crate::domain::ports::OrderGateway;
use tracing::{info, warn};

/// Places orders through the validate and execute endpoints instead of the
/// trade ticket.
pub struct ApiOrderPlacer<'a, G: OrderGateway + ?Sized> {
    gateway: &'a G,
}

impl<'a, G: OrderGateway + ?Sized> ApiOrderPlacer<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    pub async fn place(&self, request: &OrderRequest) -> Result<OrderResult, OrderError> {
        if let Err(reason) = request.validate() {
            warn!("Refusing order for {}: {}", request.symbol, reason);
            return Ok(OrderResult::invalid(reason.to_string()));
        }

        let payload = OrderPayload::from(request);
        let mut messages = OrderMessages::default();

        let validation = self.gateway.validate(&payload).await?;
        if !validation.is_recognized() {
            return Err(OrderError::Decode(
                "validation reply carried neither messages nor an exchange order identifier"
                    .to_string(),
            ));
        }
        if !validation.errors().is_empty() {
            let text = validation.error_text();
            info!("Order for {} rejected by validation: {}", payload.security_symbol_code, text);
            messages.set(MessageLabel::OrderInvalid, text);
            return Ok(OrderResult::new(OrderStage::Invalid, messages));
        }

        if !validation.warnings().is_empty() {
            messages.set(MessageLabel::Warning, validation.warning_text());
            if !request.accept_warning {
                return Ok(OrderResult::new(OrderStage::WarningShown, messages));
            }
        }

        let exchange_id = validation.exchange_order_identifier.clone();
        messages.set(MessageLabel::OrderPreview, preview_text(&payload, validation.estimated_order_amount));

        if request.dry_run {
            let mut result = OrderResult::new(OrderStage::PreviewShown, messages);
            result.order_id = exchange_id;
            return Ok(result);
        }

        let exchange_id = exchange_id.ok_or_else(|| {
            OrderError::Decode("validation reply carried no exchange order identifier".to_string())
        })?;
        let execution = self.gateway.execute(&payload, &exchange_id).await?;
        if !execution.is_recognized() {
            return Err(OrderError::Decode(format!(
                "execution reply for {} carried no order status",
                exchange_id
            )));
        }

        let mut result = match execution.error_text() {
            Some(error) => {
                warn!("Execution of {} failed: {}", payload.security_symbol_code, error);
                messages.set(MessageLabel::OrderConfirmation, error);
                OrderResult::new(OrderStage::Unconfirmed, messages)
            }
            None => {
                let status = execution
                    .order_status_code
                    .clone()
                    .unwrap_or_else(|| "SUBMITTED".to_string());
                let text = match &execution.order_id {
                    Some(id) => format!("Order {} {}", id, status),
                    None => format!("Order {}", status),
                };
                info!("{}", text);
                messages.set(MessageLabel::OrderConfirmation, text);
                OrderResult::new(OrderStage::ConfirmationShown, messages)
            }
        };
        result.submitted = true;
        result.order_id = execution.order_id.or(Some(exchange_id));
        Ok(result)
    }
}

fn preview_text(payload: &OrderPayload, estimated: Option<f64>) -> String {
    let mut text = format!(
        "{} {} {} {} {}",
        payload.trade_action_code,
        payload.order_quantity,
        payload.security_symbol_code,
        payload.order_type_code,
        payload.time_in_force_code
    );
    if let Some(amount) = estimated {
        text.push_str(&format!(" (estimated {:.2})", amount));
    }
    text
}
