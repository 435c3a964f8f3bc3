//! Authenticated browser session against the brokerage site.
//!
//! `BrokerSession` owns one page and walks the login negotiation:
//!
//! ```text
//! Unauthenticated -> CredentialsSubmitted -> Authenticated
//!                                         -> TwoFactorPending -> Authenticated | Failed
//! ```
//!
//! Two-factor presentations are probed in a fixed order (options list, push
//! approval, SMS destination picker, legacy dropdown). A probe that finds
//! nothing is a signal to try the next one, never an error. Any error during
//! login, code submission or order placement tears the session down: cookies
//! are persisted, the page is closed and the profile lock released. A phone
//! suffix that is not four digits is refused before the page is touched.

use crate::application::order_api::ApiOrderPlacer;
use crate::application::order_workflow::OrderWorkflow;
use crate::application::readers::DataReader;
use crate::config::{Config, HumanizeConfig};
use crate::domain::account::AccountsOverview;
use crate::domain::auth::{
    LoginOutcome, LoginState, RadioOption, TwoFactorChallenge, is_delivery_option,
    is_phone_suffix, select_destination, select_sms_option,
};
use crate::domain::errors::{BrowserError, FetchError, LoginError, OrderError};
use crate::domain::holdings::Holdings;
use crate::domain::order::{OrderRequest, OrderResult, OrderStatusSummary};
use crate::domain::ports::{BrowserPage, OrderGateway};
use crate::domain::quote::Quote;
use crate::domain::selector::Selector;
use crate::infrastructure::cdp::CdpPage;
use crate::infrastructure::order_gateway::HttpOrderGateway;
use crate::infrastructure::profile_store::{ProfileLease, ProfileStore};
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const USERNAME_INPUT: &str = "#userId-input-field-input";
const PASSWORD_INPUT: &str = "#password-input-field-input";
const SIGN_IN_BUTTON: &str = "#signin-button";
const OPTIONS_LIST: &str = "#optionsList";
const OPTIONS_LIST_ITEMS: &str = "#optionsList *";
const PUSH_PROMPT_TEXT: &str = "approve";
const SMS_PICKER: &str = "mds-radio-group";
const SMS_OPTIONS_ATTR: &str = "radio-buttons";
const NEXT_BUTTON: &str = "#next-content";
const LEGACY_DROPDOWN: &str = "#header-simplerAuth-dropdownoptions-styledselect";
const LEGACY_OPTIONS: &str = r#"li[role="presentation"]"#;
const SUBMIT_BUTTON: &str = r#"button[type="submit"]"#;
const SKIP_DEVICE_BUTTON: &str = "Skip this step next time";
const SAVE_AND_CONTINUE_BUTTON: &str = "Save and go to account";
const OTP_INPUT: &str = "#otpInput";
const LEGACY_OTP_INPUT: &str = "#otpcode_input-input-field";
const LEGACY_PASSWORD_INPUT: &str = "#password_input-input-field";

/// What the challenge probes found.
enum Probe {
    /// The site is waiting for approval in the phone app.
    Push,
    Outcome(LoginOutcome),
}

/// Credentials of an attempt in flight. Dropped as soon as the attempt ends.
struct PendingLogin {
    password: String,
}

pub struct BrokerSession<P: BrowserPage> {
    page: Option<P>,
    config: Config,
    lease: Option<ProfileLease>,
    state: LoginState,
    pending: Option<PendingLogin>,
}

impl BrokerSession<CdpPage> {
    /// Start Chrome as configured and open a session on its first tab.
    pub async fn launch(config: Config) -> anyhow::Result<Self> {
        let page = CdpPage::launch(&config.browser).await?;
        Ok(Self::open(page, config).await?)
    }
}

impl<P: BrowserPage> BrokerSession<P> {
    /// Wrap `page`, taking the configured profile and replaying its cookies.
    pub async fn open(page: P, config: Config) -> Result<Self, LoginError> {
        let lease = match &config.profile {
            Some(profile) => Some(ProfileStore::new(&config.profile_dir).acquire(profile)?),
            None => None,
        };

        if let Some(lease) = &lease {
            let restored = match lease.load() {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Ignoring unreadable state for {}: {}", lease.profile(), e);
                    None
                }
            };
            if let Some(stored) = restored {
                if let Err(e) = page.set_cookies(&stored.cookies).await {
                    let _ = page.close().await;
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            page: Some(page),
            config,
            lease,
            state: LoginState::Unauthenticated,
            pending: None,
        })
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == LoginState::Authenticated
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn page(&self) -> Result<&P, BrowserError> {
        self.page.as_ref().ok_or(BrowserError::Closed)
    }

    /// First login step. Returns `NeedsCode` when the site sent a code that
    /// must be passed to [`submit_two_factor_code`](Self::submit_two_factor_code).
    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
        phone_last_four: &str,
    ) -> Result<LoginOutcome, LoginError> {
        if self.page.is_none() {
            return Err(LoginError::SessionClosed);
        }
        if !is_phone_suffix(phone_last_four) {
            return Err(LoginError::InvalidPhoneSuffix {
                suffix: phone_last_four.to_string(),
            });
        }
        self.state = LoginState::Unauthenticated;
        self.pending = Some(PendingLogin {
            password: password.to_string(),
        });

        match self.negotiate(username, password, phone_last_four).await {
            Ok(LoginOutcome::Authenticated) => {
                self.authenticated().await;
                Ok(LoginOutcome::Authenticated)
            }
            Ok(LoginOutcome::NeedsCode(challenge)) => {
                info!("Two-factor code required ({})", challenge);
                self.state = LoginState::TwoFactorPending(challenge.clone());
                Ok(LoginOutcome::NeedsCode(challenge))
            }
            Err(e) => {
                error!("Login failed: {}", e);
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Second login step: enter the texted code and wait for the landing page.
    pub async fn submit_two_factor_code(&mut self, code: &str) -> Result<(), LoginError> {
        if self.page.is_none() {
            return Err(LoginError::SessionClosed);
        }
        if !matches!(self.state, LoginState::TwoFactorPending(_)) {
            return Err(LoginError::NotAwaitingCode);
        }

        match self.enter_code(code).await {
            Ok(()) => {
                self.authenticated().await;
                Ok(())
            }
            Err(e) => {
                error!("Two-factor login failed: {}", e);
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn negotiate(
        &mut self,
        username: &str,
        password: &str,
        last_four: &str,
    ) -> Result<LoginOutcome, LoginError> {
        let page = self.page.as_ref().ok_or(LoginError::SessionClosed)?;
        let endpoints = &self.config.endpoints;
        let t = &self.config.timeouts;

        page.goto(&endpoints.login_page).await?;
        tokio::time::sleep(t.settle).await;

        let user_input = Selector::css(USERNAME_INPUT);
        let password_input = Selector::css(PASSWORD_INPUT);
        if !page.wait_for(&user_input, t.login_fields).await?
            || !page.wait_for(&password_input, t.login_fields).await?
        {
            return Err(LoginError::MissingControl {
                what: "username or password field".to_string(),
            });
        }

        let humanize = &self.config.browser.humanize;
        type_credential(page, &user_input, username, humanize, 1).await?;
        type_credential(page, &password_input, password, humanize, -1).await?;

        let sign_in = Selector::css(SIGN_IN_BUTTON);
        if !page.wait_for(&sign_in, t.probe).await? {
            return Err(LoginError::MissingControl {
                what: "sign-in button".to_string(),
            });
        }
        page.click(&sign_in).await?;
        self.state = LoginState::CredentialsSubmitted;
        info!("Credentials submitted");
        tokio::time::sleep(t.settle).await;

        if self.on_landing().await? {
            return Ok(LoginOutcome::Authenticated);
        }

        match self.probe_challenges(last_four).await? {
            Some(Probe::Push) => {
                self.state = LoginState::TwoFactorPending(TwoFactorChallenge::PushNotification);
                return self.await_push_approval().await;
            }
            Some(Probe::Outcome(outcome)) => return Ok(outcome),
            None => {}
        }

        let url = page.current_url().await?;
        if endpoints.is_opt_out(&url) {
            self.pass_device_opt_out(true).await?;
        }
        if self.on_landing().await? {
            return Ok(LoginOutcome::Authenticated);
        }

        let url = page.current_url().await?;
        Err(LoginError::UnknownPageState { url })
    }

    /// Walk the two-factor presentations. `None` when none was found.
    async fn probe_challenges(&self, last_four: &str) -> Result<Option<Probe>, LoginError> {
        let page = self.page()?;
        let t = &self.config.timeouts;

        if !page.wait_for(&Selector::css(OPTIONS_LIST), t.challenge_probe).await? {
            debug!("No options list, trying the legacy dropdown");
            return Ok(self.legacy_dropdown(last_four).await?.map(Probe::Outcome));
        }

        let items = Selector::css(OPTIONS_LIST_ITEMS);
        let options = page.elements(&items).await?;
        match options
            .iter()
            .position(|o| o.attribute("label").is_some_and(is_delivery_option))
        {
            Some(index) => page.click_nth(&items, index).await?,
            None => debug!("Options list offered no text or push entry"),
        }
        tokio::time::sleep(t.landing_poll_interval).await;

        if page
            .wait_for(&Selector::text(PUSH_PROMPT_TEXT), t.push_probe)
            .await?
        {
            return Ok(Some(Probe::Push));
        }
        debug!("No push prompt, trying the SMS picker");

        let picker = Selector::css(SMS_PICKER);
        if !page.wait_for(&picker, t.challenge_probe).await? {
            debug!("No SMS picker");
            return Ok(None);
        }

        let options: Vec<RadioOption> = match page.attribute(&picker, SMS_OPTIONS_ATTR).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| LoginError::Decode {
                reason: format!("{} attribute: {}", SMS_OPTIONS_ATTR, e),
            })?,
            None => Vec::new(),
        };
        let Some(index) = select_sms_option(&options, last_four) else {
            return Err(LoginError::PhoneSuffixNotFound {
                suffix: last_four.to_string(),
                offered: options.into_iter().map(|o| o.label).collect(),
            });
        };
        page.set_attribute(&picker, "selected-index", &index.to_string())
            .await?;
        let destination = options[index].label.clone();
        info!("Selected SMS destination {}", destination);

        let next = Selector::css(NEXT_BUTTON);
        if !page.wait_for(&next, t.probe).await? {
            return Err(LoginError::MissingControl {
                what: "next button".to_string(),
            });
        }
        page.click(&next).await?;
        Ok(Some(Probe::Outcome(LoginOutcome::NeedsCode(
            TwoFactorChallenge::Sms { destination },
        ))))
    }

    async fn await_push_approval(&self) -> Result<LoginOutcome, LoginError> {
        let window = self.config.timeouts.push_approval_window;
        info!(
            "Waiting up to {}s for push approval in the phone app",
            window.as_secs()
        );
        if self.wait_for_landing(window).await? {
            return Ok(LoginOutcome::Authenticated);
        }
        Err(LoginError::Timeout {
            waited_secs: window.as_secs(),
        })
    }

    async fn legacy_dropdown(&self, last_four: &str) -> Result<Option<LoginOutcome>, LoginError> {
        let page = self.page()?;
        let t = &self.config.timeouts;

        let dropdown = Selector::css(LEGACY_DROPDOWN);
        if !page.wait_for(&dropdown, t.probe).await? {
            debug!("No legacy dropdown");
            return Ok(None);
        }
        page.click(&dropdown).await?;

        let items = Selector::css(LEGACY_OPTIONS);
        let options = page.elements(&items).await?;
        let Some(index) = select_destination(options.iter().map(|o| o.text.as_str()), last_four)
        else {
            return Err(LoginError::PhoneSuffixNotFound {
                suffix: last_four.to_string(),
                offered: options.into_iter().map(|o| o.text).collect(),
            });
        };
        page.click_nth(&items, index).await?;
        let destination = options[index].text.trim().to_string();

        let submit = Selector::css(SUBMIT_BUTTON);
        if !page.wait_for(&submit, t.probe).await? {
            return Err(LoginError::MissingControl {
                what: "submit button".to_string(),
            });
        }
        page.click(&submit).await?;
        Ok(Some(LoginOutcome::NeedsCode(
            TwoFactorChallenge::LegacyDropdown { destination },
        )))
    }

    async fn enter_code(&self, code: &str) -> Result<(), LoginError> {
        let page = self.page()?;
        let t = &self.config.timeouts;
        tokio::time::sleep(t.settle).await;

        let otp = Selector::css(OTP_INPUT);
        let legacy_otp = Selector::css(LEGACY_OTP_INPUT);
        if page.wait_for(&otp, t.challenge_probe).await? {
            page.send_keys(&otp, code).await?;
            let next = Selector::css(NEXT_BUTTON);
            if !page.wait_for(&next, t.probe).await? {
                return Err(LoginError::MissingControl {
                    what: "next button".to_string(),
                });
            }
            page.click(&next).await?;
        } else if page.wait_for(&legacy_otp, t.challenge_probe).await? {
            let password = self
                .pending
                .as_ref()
                .map(|p| p.password.as_str())
                .ok_or(LoginError::NotAwaitingCode)?;
            page.send_keys(&legacy_otp, code).await?;
            page.send_keys(&Selector::css(LEGACY_PASSWORD_INPUT), password)
                .await?;
            page.click(&Selector::css(SUBMIT_BUTTON)).await?;
        } else {
            warn!("No code entry field found, waiting for landing anyway");
        }

        tokio::time::sleep(t.settle).await;
        if self.config.endpoints.is_opt_out(&page.current_url().await?) {
            self.pass_device_opt_out(false).await?;
        }

        if self.wait_for_landing(t.code_landing_window).await? {
            Ok(())
        } else {
            Err(LoginError::Timeout {
                waited_secs: t.code_landing_window.as_secs(),
            })
        }
    }

    /// "Skip saving this device" interstitial. The buttons are mandatory on
    /// the first step and best effort after a code.
    async fn pass_device_opt_out(&self, required: bool) -> Result<(), LoginError> {
        let page = self.page()?;
        for label in [SKIP_DEVICE_BUTTON, SAVE_AND_CONTINUE_BUTTON] {
            let button = Selector::button_containing(label);
            if page.wait_for(&button, self.config.timeouts.probe).await? {
                page.click(&button).await?;
            } else if required {
                return Err(LoginError::MissingControl {
                    what: format!("\"{}\" button", label),
                });
            } else {
                debug!("No \"{}\" button on the opt-out page", label);
            }
        }
        Ok(())
    }

    async fn on_landing(&self) -> Result<bool, LoginError> {
        let url = self.page()?.current_url().await?;
        Ok(self.config.endpoints.is_landing(&url))
    }

    async fn wait_for_landing(&self, window: Duration) -> Result<bool, LoginError> {
        let deadline = Instant::now() + window;
        loop {
            if self.on_landing().await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.config.timeouts.landing_poll_interval).await;
        }
    }

    async fn authenticated(&mut self) {
        self.state = LoginState::Authenticated;
        self.pending = None;
        info!("Authenticated");
        self.persist().await;
    }

    async fn persist(&self) {
        let (Some(page), Some(lease)) = (&self.page, &self.lease) else {
            return;
        };
        match page.cookies().await {
            Ok(cookies) => {
                if let Err(e) = lease.save(&cookies) {
                    warn!("Failed to save profile {}: {}", lease.profile(), e);
                }
            }
            Err(e) => warn!("Failed to read cookies for {}: {}", lease.profile(), e),
        }
    }

    /// Persist what we have, close the page and release the profile.
    async fn teardown(&mut self) {
        self.persist().await;
        self.pending = None;
        self.state = LoginState::Failed;
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close page during teardown: {}", e);
            }
        }
        self.lease = None;
    }

    /// Persist cookies, close the page and release the profile.
    pub async fn close(mut self) -> Result<(), LoginError> {
        self.persist().await;
        self.pending = None;
        self.lease = None;
        match self.page.take() {
            Some(page) => page.close().await.map_err(LoginError::from),
            None => Ok(()),
        }
    }

    fn reader_page(&self) -> Result<&P, FetchError> {
        match &self.state {
            LoginState::Unauthenticated | LoginState::Authenticated => Ok(self.page()?),
            _ => Err(FetchError::NotAuthenticated),
        }
    }

    fn reader(&self) -> Result<DataReader<'_, P>, FetchError> {
        let page = self.reader_page()?;
        Ok(DataReader::new(
            page,
            &self.config.endpoints,
            &self.config.retry,
            &self.config.timeouts,
        ))
    }

    pub async fn fetch_accounts(&self) -> Result<Option<AccountsOverview>, FetchError> {
        self.reader()?.fetch_accounts().await
    }

    pub async fn fetch_holdings(&self, account_id: &str) -> Result<Option<Holdings>, FetchError> {
        self.reader()?.fetch_holdings(account_id).await
    }

    pub async fn fetch_quote(&self, account_id: &str, symbol: &str) -> Result<Quote, FetchError> {
        self.reader()?.fetch_quote(account_id, symbol).await
    }

    pub async fn fetch_order_statuses(
        &self,
        account_id: &str,
    ) -> Result<Option<Vec<OrderStatusSummary>>, FetchError> {
        self.reader()?.fetch_order_statuses(account_id).await
    }

    /// Place an order through the trade ticket.
    pub async fn place_order(&mut self, request: &OrderRequest) -> Result<OrderResult, OrderError> {
        let result = {
            let page = self.order_page()?;
            OrderWorkflow::new(page, &self.config.endpoints, &self.config.timeouts)
                .place(request)
                .await
        };
        self.finish_order(result).await
    }

    /// Place an order through the validate and execute endpoints, reusing the
    /// browser's cookies.
    pub async fn place_order_via_api(
        &mut self,
        request: &OrderRequest,
    ) -> Result<OrderResult, OrderError> {
        let cookies = self.order_page()?.cookies().await?;
        let gateway = HttpOrderGateway::new(
            &self.config.endpoints,
            &cookies,
            &self.config.browser.user_agent,
        )?;
        self.place_order_with(&gateway, request).await
    }

    pub async fn place_order_with<G: OrderGateway + ?Sized>(
        &mut self,
        gateway: &G,
        request: &OrderRequest,
    ) -> Result<OrderResult, OrderError> {
        self.order_page()?;
        let result = ApiOrderPlacer::new(gateway).place(request).await;
        self.finish_order(result).await
    }

    fn order_page(&self) -> Result<&P, OrderError> {
        match &self.state {
            LoginState::Unauthenticated | LoginState::Authenticated => Ok(self.page()?),
            _ => Err(OrderError::NotAuthenticated),
        }
    }

    async fn finish_order(
        &mut self,
        result: Result<OrderResult, OrderError>,
    ) -> Result<OrderResult, OrderError> {
        if let Err(e) = &result {
            error!("Order placement failed: {}", e);
            self.teardown().await;
        }
        result
    }
}

/// Type into `field`, one key at a time with jittered pauses when humanizing.
/// `scroll_sign` picks the direction of the noise scroll before typing.
async fn type_credential<P: BrowserPage + ?Sized>(
    page: &P,
    field: &Selector,
    text: &str,
    humanize: &HumanizeConfig,
    scroll_sign: i64,
) -> Result<(), BrowserError> {
    if !humanize.enabled {
        return page.fill(field, text).await;
    }

    page.scroll_by(scroll_sign * noise_scroll()).await?;
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        page.send_keys(field, ch.encode_utf8(&mut buf)).await?;
        tokio::time::sleep(keystroke_pause(humanize)).await;
    }
    let (x, y) = noise_click();
    page.mouse_click_at(x, y).await
}

fn keystroke_pause(humanize: &HumanizeConfig) -> Duration {
    let min = humanize.min_keystroke.as_millis() as u64;
    let max = (humanize.max_keystroke.as_millis() as u64).max(min + 1);
    Duration::from_millis(rand::rng().random_range(min..max))
}

fn noise_scroll() -> i64 {
    rand::rng().random_range(900..1500)
}

fn noise_click() -> (f64, f64) {
    let mut rng = rand::rng();
    (rng.random_range(0.0..400.0), rng.random_range(0.0..400.0))
}
