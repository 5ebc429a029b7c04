// SPDX-License-Identifier: MIT OR Apache-2.0
//! Environment-driven configuration.
//!
//! Everything is read from `ARQONBUS_*` variables; there is no config
//! file. `validate` reports every problem at once, `preflight` enforces
//! the deployment guardrails that must kill startup in staging and
//! production.

use arq_casil::CasilConfig;
use arq_storage::StorageMode;
use arq_wire::WireFormat;
use thiserror::Error;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Which wire format the infra path speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InfraProtocol {
    /// JSON frames.
    #[default]
    Json,
    /// Binary frames.
    Protobuf,
}

impl InfraProtocol {
    /// Parse the env form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "protobuf" => Some(Self::Protobuf),
            _ => None,
        }
    }

    /// The matching codec format.
    #[must_use]
    pub fn wire_format(self) -> WireFormat {
        match self {
            Self::Json => WireFormat::Json,
            Self::Protobuf => WireFormat::Protobuf,
        }
    }
}

/// Socket bind settings.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Bind host. Required outside local environments.
    pub host: Option<String>,
    /// Bind port.
    pub port: u16,
}

/// JWT settings.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// Validate `Authorization: Bearer` tokens at accept.
    pub enable_authentication: bool,
    /// HS256 secret.
    pub jwt_secret: Option<String>,
}

/// Storage selection.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Persist routed envelopes at all.
    pub enable_persistence: bool,
    /// Backend registry name.
    pub backend: String,
    /// Failure posture.
    pub mode: StorageMode,
    /// Memory backend retention.
    pub max_size: usize,
    /// Postgres connection string.
    pub postgres_url: Option<String>,
    /// Valkey/Redis connection string.
    pub valkey_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enable_persistence: true,
            backend: "memory".to_string(),
            mode: StorageMode::Degraded,
            max_size: 10_000,
            postgres_url: None,
            valkey_url: None,
        }
    }
}

/// Tier-Omega substrate runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OmegaRuntime {
    /// In-process substrate table.
    #[default]
    Memory,
    /// Firecracker microVM substrates.
    Firecracker,
}

impl OmegaRuntime {
    /// Parse the env form, `None` for anything unknown.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "firecracker" => Some(Self::Firecracker),
            _ => None,
        }
    }
}

/// Tier-Omega lab settings.
#[derive(Debug, Clone)]
pub struct TierOmegaConfig {
    /// Feature gate.
    pub enabled: bool,
    /// Room omega events broadcast into.
    pub lab_room: String,
    /// Channel omega events broadcast into.
    pub lab_channel: String,
    /// Event ring capacity.
    pub max_events: usize,
    /// Substrate table capacity.
    pub max_substrates: usize,
    /// Substrate runtime. `None` when the env value failed to parse.
    pub runtime: Option<OmegaRuntime>,
    /// Firecracker binary path.
    pub firecracker_bin: Option<String>,
    /// Kernel image path.
    pub kernel_image: Option<String>,
    /// Root filesystem image path.
    pub rootfs_image: Option<String>,
    /// MicroVM cap.
    pub max_vms: usize,
}

impl Default for TierOmegaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lab_room: "omega-lab".to_string(),
            lab_channel: "signals".to_string(),
            max_events: 256,
            max_substrates: 16,
            runtime: Some(OmegaRuntime::Memory),
            firecracker_bin: None,
            kernel_image: None,
            rootfs_image: None,
            max_vms: 1,
        }
    }
}

/// Where non-ALLOW CASIL outcomes are published as telemetry envelopes.
#[derive(Debug, Clone)]
pub struct CasilTelemetryConfig {
    /// Target room.
    pub room: String,
    /// Target channel.
    pub channel: String,
}

impl Default for CasilTelemetryConfig {
    fn default() -> Self {
        Self {
            room: "casil".to_string(),
            channel: "telemetry".to_string(),
        }
    }
}

/// Operator registration auth.
#[derive(Debug, Clone, Default)]
pub struct OperatorAuthConfig {
    /// Require a bearer token to register.
    pub required: bool,
    /// Expected token.
    pub token: Option<String>,
}

/// HTTP admin facade settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Serve the facade at all.
    pub enabled: bool,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// `X-API-Key` value required on admin routes.
    pub api_key: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: None,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default)]
pub struct ArqonBusConfig {
    /// Deployment environment (`local`, `staging`, `production`).
    pub environment: String,
    /// Socket bind.
    pub server: ServerConfig,
    /// Infra path wire format.
    pub infra_protocol: InfraProtocol,
    /// Tolerate JSON frames on a protobuf infra path.
    pub allow_json_infra: bool,
    /// JWT settings.
    pub security: SecurityConfig,
    /// Storage selection.
    pub storage: StorageSettings,
    /// Policy engine configuration.
    pub casil: CasilConfig,
    /// Telemetry target for policy outcomes.
    pub casil_telemetry: CasilTelemetryConfig,
    /// Tier-Omega lane.
    pub tier_omega: TierOmegaConfig,
    /// Operator registration auth.
    pub operator_auth: OperatorAuthConfig,
    /// HTTP facade.
    pub http: HttpConfig,
}

/// Fatal startup guardrail violation.
#[derive(Debug, Error)]
#[error("Startup preflight failed: {0}")]
pub struct PreflightError(pub String);

impl ArqonBusConfig {
    /// Local-development defaults: JSON infra on port 8765.
    #[must_use]
    pub fn local() -> Self {
        Self {
            environment: "local".to_string(),
            server: ServerConfig {
                host: Some("127.0.0.1".to_string()),
                port: 8765,
            },
            allow_json_infra: true,
            ..Self::default()
        }
    }

    /// Read the full configuration from `ARQONBUS_*` variables.
    #[must_use]
    pub fn from_environment() -> Self {
        let environment = env_string("ARQONBUS_ENVIRONMENT").unwrap_or_else(|| "local".to_string());
        let infra_protocol = env_string("ARQONBUS_INFRA_PROTOCOL")
            .and_then(|v| InfraProtocol::parse(&v))
            .unwrap_or_default();

        let casil = CasilConfig {
            enabled: env_bool("ARQONBUS_CASIL_ENABLED", false),
            mode: env_string("ARQONBUS_CASIL_MODE")
                .and_then(|v| arq_casil::CasilMode::parse(&v))
                .unwrap_or_default(),
            ..CasilConfig::default()
        };

        Self {
            environment: environment.clone(),
            server: ServerConfig {
                host: env_string("ARQONBUS_SERVER_HOST"),
                port: env_parse("ARQONBUS_SERVER_PORT", 8765),
            },
            infra_protocol,
            allow_json_infra: env_bool("ARQONBUS_ALLOW_JSON_INFRA", environment == "local"),
            security: SecurityConfig {
                enable_authentication: env_bool("ARQONBUS_ENABLE_AUTH", false),
                jwt_secret: env_string("ARQONBUS_JWT_SECRET"),
            },
            storage: StorageSettings {
                enable_persistence: env_bool("ARQONBUS_ENABLE_PERSISTENCE", true),
                backend: env_string("ARQONBUS_STORAGE_BACKEND").unwrap_or_else(|| "memory".to_string()),
                mode: env_string("ARQONBUS_STORAGE_MODE")
                    .and_then(|v| StorageMode::parse(&v))
                    .unwrap_or_default(),
                max_size: env_parse("ARQONBUS_STORAGE_MAX_SIZE", 10_000),
                postgres_url: env_string("ARQONBUS_POSTGRES_URL"),
                valkey_url: env_string("ARQONBUS_VALKEY_URL").or_else(|| env_string("ARQONBUS_REDIS_URL")),
            },
            casil,
            casil_telemetry: CasilTelemetryConfig {
                room: env_string("ARQONBUS_CASIL_TELEMETRY_ROOM")
                    .unwrap_or_else(|| "casil".to_string()),
                channel: env_string("ARQONBUS_CASIL_TELEMETRY_CHANNEL")
                    .unwrap_or_else(|| "telemetry".to_string()),
            },
            tier_omega: TierOmegaConfig {
                enabled: env_bool("ARQONBUS_OMEGA_ENABLED", false),
                lab_room: env_string("ARQONBUS_OMEGA_LAB_ROOM").unwrap_or_else(|| "omega-lab".to_string()),
                lab_channel: env_string("ARQONBUS_OMEGA_LAB_CHANNEL").unwrap_or_else(|| "signals".to_string()),
                max_events: env_parse("ARQONBUS_OMEGA_MAX_EVENTS", 256),
                max_substrates: env_parse("ARQONBUS_OMEGA_MAX_SUBSTRATES", 16),
                runtime: match env_string("ARQONBUS_OMEGA_RUNTIME") {
                    Some(raw) => OmegaRuntime::parse(&raw),
                    None => Some(OmegaRuntime::Memory),
                },
                firecracker_bin: env_string("ARQONBUS_OMEGA_FIRECRACKER_BIN"),
                kernel_image: env_string("ARQONBUS_OMEGA_KERNEL_IMAGE"),
                rootfs_image: env_string("ARQONBUS_OMEGA_ROOTFS_IMAGE"),
                max_vms: env_parse("ARQONBUS_OMEGA_MAX_VMS", 1),
            },
            operator_auth: OperatorAuthConfig {
                required: env_bool("ARQONBUS_OPERATOR_AUTH_REQUIRED", false),
                token: env_string("ARQONBUS_OPERATOR_AUTH_TOKEN"),
            },
            http: HttpConfig {
                enabled: env_bool("ARQONBUS_HTTP_ENABLED", false),
                host: env_string("ARQONBUS_HTTP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: env_parse("ARQONBUS_HTTP_PORT", 8080),
                api_key: env_string("ARQONBUS_API_KEY"),
            },
        }
    }

    /// Whether this deployment is staging or production.
    #[must_use]
    pub fn is_hardened_environment(&self) -> bool {
        matches!(self.environment.as_str(), "staging" | "production")
    }

    /// Semantic validation; one message per problem, empty when clean.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server port must be non-zero".to_string());
        }
        if self.security.enable_authentication && self.security.jwt_secret.is_none() {
            errors.push("authentication requires ARQONBUS_JWT_SECRET".to_string());
        }
        if self.operator_auth.required && self.operator_auth.token.is_none() {
            errors.push("operator auth requires ARQONBUS_OPERATOR_AUTH_TOKEN".to_string());
        }

        let omega = &self.tier_omega;
        if omega.lab_room.is_empty() {
            errors.push("Tier-Omega lab_room must be non-empty".to_string());
        }
        if omega.lab_channel.is_empty() {
            errors.push("Tier-Omega lab_channel must be non-empty".to_string());
        }
        if omega.max_events == 0 {
            errors.push("Tier-Omega max_events must be >= 1".to_string());
        }
        if omega.max_substrates == 0 {
            errors.push("Tier-Omega max_substrates must be >= 1".to_string());
        }
        if omega.runtime.is_none() {
            errors.push("Tier-Omega runtime must be one of: memory, firecracker".to_string());
        }
        if omega.max_vms == 0 {
            errors.push("Tier-Omega max_vms must be >= 1".to_string());
        }
        if omega.enabled && omega.runtime == Some(OmegaRuntime::Firecracker) {
            if omega.kernel_image.is_none() {
                errors.push(
                    "Tier-Omega firecracker runtime requires ARQONBUS_OMEGA_KERNEL_IMAGE".to_string(),
                );
            }
            if omega.rootfs_image.is_none() {
                errors.push(
                    "Tier-Omega firecracker runtime requires ARQONBUS_OMEGA_ROOTFS_IMAGE".to_string(),
                );
            }
        }

        errors
    }

    /// Deployment guardrails that must stop startup.
    ///
    /// # Errors
    ///
    /// Returns [`PreflightError`] when a hardened environment is missing
    /// an explicit bind host, or runs JSON infra without the explicit
    /// override.
    pub fn preflight(&self) -> Result<(), PreflightError> {
        if self.is_hardened_environment() {
            if self.server.host.is_none() {
                return Err(PreflightError(
                    "ARQONBUS_SERVER_HOST must be set explicitly outside the local environment"
                        .to_string(),
                ));
            }
            if self.infra_protocol == InfraProtocol::Json && !self.allow_json_infra {
                return Err(PreflightError(
                    "Infrastructure protocol must be protobuf in staging/prod (set \
                     ARQONBUS_ALLOW_JSON_INFRA=true to override)"
                        .to_string(),
                ));
            }
        }

        let errors = self.validate();
        if !errors.is_empty() {
            return Err(PreflightError(errors.join("; ")));
        }
        Ok(())
    }
}
