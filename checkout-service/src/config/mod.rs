use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub client: ClientConfig,
    pub ops: OpsConfig,
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Secret<String>,
    pub db_name: String,
}

/// Merchant settings for the hosted payment form.
#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    /// Form endpoint the browser posts the signed fields to.
    pub form_url: String,
    pub product_code: String,
    /// Shared HMAC secret. Differs between sandbox and production.
    pub secret_key: Secret<String>,
    /// Prefix for generated transaction ids.
    pub merchant_prefix: String,
    /// Public base URL of this service, used to build the callback URLs.
    pub callback_base_url: String,
}

impl GatewayConfig {
    pub fn success_callback_url(&self) -> String {
        format!(
            "{}/payments/esewa/success",
            self.callback_base_url.trim_end_matches('/')
        )
    }

    pub fn failure_callback_url(&self) -> String {
        format!(
            "{}/payments/esewa/failure",
            self.callback_base_url.trim_end_matches('/')
        )
    }
}

/// Storefront pages the user lands on after a callback.
#[derive(Deserialize, Clone, Debug)]
pub struct ClientConfig {
    pub success_url: String,
    pub failure_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct OpsConfig {
    pub api_key: Secret<String>,
}

const DEFAULT_PORT: u16 = 3003;

/// `CHECKOUT_SERVICE_PORT` wins over an explicitly configured `APP__PORT`.
fn resolve_port(service_port: Option<&str>, configured: Option<u16>) -> Result<u16> {
    match (service_port, configured) {
        (Some(port), _) => Ok(port.parse()?),
        (None, Some(port)) => Ok(port),
        (None, None) => Ok(DEFAULT_PORT),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let common = core_config::Config::load()?;
        let is_prod = common.is_production();

        let port = resolve_port(
            env::var("CHECKOUT_SERVICE_PORT").ok().as_deref(),
            env::var("APP__PORT").is_ok().then_some(common.port),
        )?;

        let backend = match get_env("CHECKOUT_STORE", Some("mongo"), false)?.as_str() {
            "memory" if !is_prod => StoreBackend::Memory,
            "memory" => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CHECKOUT_STORE=memory is not allowed in production"
                ))
                .into())
            }
            _ => StoreBackend::Mongo,
        };

        let local_base_url = format!("http://localhost:{}", port);
        let callback_base_url =
            get_env("CHECKOUT_CALLBACK_BASE_URL", Some(local_base_url.as_str()), is_prod)?;

        Ok(Self {
            common: core_config::Config { port, ..common },
            database: DatabaseConfig {
                backend,
                url: Secret::new(get_env(
                    "CHECKOUT_DATABASE_URL",
                    Some("mongodb://localhost:27017"),
                    is_prod,
                )?),
                db_name: get_env("CHECKOUT_DATABASE_NAME", Some("checkout_db"), is_prod)?,
            },
            gateway: GatewayConfig {
                form_url: get_env(
                    "ESEWA_FORM_URL",
                    Some("https://rc-epay.esewa.com.np/api/epay/main/v2/form"),
                    is_prod,
                )?,
                product_code: get_env("ESEWA_PRODUCT_CODE", Some("EPAYTEST"), is_prod)?,
                secret_key: Secret::new(get_env("ESEWA_SECRET_KEY", None, is_prod)?),
                merchant_prefix: get_env("CHECKOUT_MERCHANT_PREFIX", Some("FIT"), is_prod)?,
                callback_base_url,
            },
            client: ClientConfig {
                success_url: get_env(
                    "CLIENT_SUCCESS_URL",
                    Some("http://localhost:5173/payment/success"),
                    is_prod,
                )?,
                failure_url: get_env(
                    "CLIENT_FAILURE_URL",
                    Some("http://localhost:5173/payment/failure"),
                    is_prod,
                )?,
            },
            ops: OpsConfig {
                api_key: Secret::new(get_env("INTERNAL_API_KEY", Some("dev-internal-key"), is_prod)?),
            },
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            service_name: "checkout-service".to_string(),
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}
