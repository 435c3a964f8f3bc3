use serde::Deserialize;
use std::fmt;

/// Where a login negotiation currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    CredentialsSubmitted,
    TwoFactorPending(TwoFactorChallenge),
    Authenticated,
    Failed,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginState::Unauthenticated => write!(f, "Unauthenticated"),
            LoginState::CredentialsSubmitted => write!(f, "CredentialsSubmitted"),
            LoginState::TwoFactorPending(c) => write!(f, "TwoFactorPending({})", c),
            LoginState::Authenticated => write!(f, "Authenticated"),
            LoginState::Failed => write!(f, "Failed"),
        }
    }
}

/// How the site asked for the second factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwoFactorChallenge {
    /// Approval happens out-of-band in the phone app.
    PushNotification,
    /// A code was texted to `destination`, the masked phone label.
    Sms { destination: String },
    /// Older dropdown-and-submit page.
    LegacyDropdown { destination: String },
}

impl fmt::Display for TwoFactorChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwoFactorChallenge::PushNotification => write!(f, "push"),
            TwoFactorChallenge::Sms { destination } => write!(f, "sms to {}", destination),
            TwoFactorChallenge::LegacyDropdown { destination } => {
                write!(f, "legacy dropdown to {}", destination)
            }
        }
    }
}

/// Result of the first login step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    NeedsCode(TwoFactorChallenge),
}

impl LoginOutcome {
    pub fn needs_code(&self) -> bool {
        matches!(self, LoginOutcome::NeedsCode(_))
    }
}

/// One entry of the `radio-buttons` JSON attribute on the SMS destination
/// picker.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RadioOption {
    #[serde(default)]
    pub label: String,
}

/// Whether `suffix` is a usable phone tail: exactly four ASCII digits.
pub fn is_phone_suffix(suffix: &str) -> bool {
    suffix.len() == 4 && suffix.bytes().all(|b| b.is_ascii_digit())
}

/// Last four digits of the phone number in a destination label such as
/// `Text xxx-xxx-1234` or `xxx-xxx-1234 (mobile)`.
pub fn phone_tail(label: &str) -> Option<&str> {
    let end = label.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = label[..end]
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    (end - start == 4).then(|| &label[start..end])
}

/// Index of the first destination whose phone number ends in `last_four`.
pub fn select_destination<'a>(
    labels: impl IntoIterator<Item = &'a str>,
    last_four: &str,
) -> Option<usize> {
    if !is_phone_suffix(last_four) {
        return None;
    }
    labels
        .into_iter()
        .position(|label| phone_tail(label) == Some(last_four))
}

/// Index of the SMS option addressed to the phone ending in `last_four`.
pub fn select_sms_option(options: &[RadioOption], last_four: &str) -> Option<usize> {
    select_destination(options.iter().map(|o| o.label.as_str()), last_four)
}

/// Labels on the options list that route to a text or push challenge.
pub fn is_delivery_option(label: &str) -> bool {
    label.contains("Get a text") || label.contains("push notification")
}
