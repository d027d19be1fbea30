use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_key: String,
    pub supabase_jwt_secret: String,
    pub payment_webhook_secret: String,
    pub payment_api_base_url: String,
    pub payment_api_token: String,
    pub payment_api_timeout_secs: u64,
    pub rate_limit_fail_open: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_WEBHOOK_SECRET not set, webhook deliveries will be rejected");
                    String::new()
                }),
            payment_api_base_url: env::var("PAYMENT_API_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_API_BASE_URL not set, using default");
                    "https://api.mercadopago.com".to_string()
                }),
            payment_api_token: env::var("PAYMENT_API_TOKEN")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_API_TOKEN not set, using empty value");
                    String::new()
                }),
            payment_api_timeout_secs: env::var("PAYMENT_API_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            rate_limit_fail_open: env::var("RATE_LIMIT_FAIL_OPEN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// Webhook deliveries are rejected outright while this returns false.
    pub fn is_webhook_configured(&self) -> bool {
        !self.payment_webhook_secret.is_empty()
    }
}
