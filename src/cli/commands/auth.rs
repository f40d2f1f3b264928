use crate::api::handlers::auth::BootstrapMode;
use anyhow::{Result, anyhow};
use clap::{Arg, ArgMatches, Command, builder::PossibleValuesParser};
use secrecy::SecretString;
use std::str::FromStr;

pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ADMIN_EMAIL: &str = "admin-email";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_RESET_TTL_SECONDS: &str = "reset-ttl-seconds";
pub const ARG_BOOTSTRAP_MODE: &str = "bootstrap-mode";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BASE_URL)
                .long(ARG_BASE_URL)
                .help("Public dashboard URL, used for reset links and the CORS origin")
                .env("STUDIO_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Secret used to sign session and reset tokens")
                .env("STUDIO_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ADMIN_EMAIL)
                .long(ARG_ADMIN_EMAIL)
                .help("Address that receives password reset links (defaults to the admin's login email)")
                .env("STUDIO_ADMIN_EMAIL"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session token lifetime in seconds")
                .env("STUDIO_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RESET_TTL_SECONDS)
                .long(ARG_RESET_TTL_SECONDS)
                .help("Password reset token lifetime in seconds")
                .env("STUDIO_RESET_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_BOOTSTRAP_MODE)
                .long(ARG_BOOTSTRAP_MODE)
                .help("Whether the first login against an empty store creates the administrator")
                .env("STUDIO_BOOTSTRAP_MODE")
                .default_value(BootstrapMode::FirstLogin.as_str())
                .value_parser(PossibleValuesParser::new([
                    BootstrapMode::FirstLogin.as_str(),
                    BootstrapMode::Disabled.as_str(),
                ])),
        )
}

#[derive(Debug)]
pub struct Options {
    pub base_url: String,
    pub jwt_secret: Option<SecretString>,
    pub admin_email: Option<String>,
    pub session_ttl_seconds: u64,
    pub reset_ttl_seconds: u64,
    pub bootstrap_mode: BootstrapMode,
}

impl Options {
    /// Parse auth-related CLI arguments into options.
    ///
    /// # Errors
    /// Returns an error if a value cannot be interpreted.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let base_url = matches
            .get_one::<String>(ARG_BASE_URL)
            .cloned()
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_BASE_URL}"))?;
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .filter(|secret| !secret.trim().is_empty())
            .map(|secret| SecretString::from(secret.clone()));
        let admin_email = matches
            .get_one::<String>(ARG_ADMIN_EMAIL)
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty());
        let session_ttl_seconds = matches
            .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
            .copied()
            .unwrap_or(86_400);
        let reset_ttl_seconds = matches
            .get_one::<u64>(ARG_RESET_TTL_SECONDS)
            .copied()
            .unwrap_or(900);
        let bootstrap_mode = matches
            .get_one::<String>(ARG_BOOTSTRAP_MODE)
            .map(|mode| BootstrapMode::from_str(mode))
            .transpose()
            .map_err(|err| anyhow!("invalid --{ARG_BOOTSTRAP_MODE}: {err}"))?
            .unwrap_or_default();

        Ok(Self {
            base_url,
            jwt_secret,
            admin_email,
            session_ttl_seconds,
            reset_ttl_seconds,
            bootstrap_mode,
        })
    }
}
