use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_EMAIL_FROM: &str = "email-from";
pub const ARG_RESEND_API_KEY: &str = "resend-api-key";
pub const ARG_RESEND_API_URL: &str = "resend-api-url";
pub const ARG_EMAIL_TIMEOUT_SECONDS: &str = "email-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("Sender of password reset emails")
                .env("STUDIO_EMAIL_FROM")
                .default_value("Studio Admin <noreply@studio-admin.dev>"),
        )
        .arg(
            Arg::new(ARG_RESEND_API_KEY)
                .long(ARG_RESEND_API_KEY)
                .help("Resend API key; without it emails are only logged")
                .env("STUDIO_RESEND_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_RESEND_API_URL)
                .long(ARG_RESEND_API_URL)
                .help("Resend send-email endpoint")
                .env("STUDIO_RESEND_API_URL")
                .default_value("https://api.resend.com/emails"),
        )
        .arg(
            Arg::new(ARG_EMAIL_TIMEOUT_SECONDS)
                .long(ARG_EMAIL_TIMEOUT_SECONDS)
                .help("Timeout for a single email delivery request")
                .env("STUDIO_EMAIL_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub from: String,
    pub resend_api_key: Option<SecretString>,
    pub resend_api_url: String,
    pub timeout_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            from: matches
                .get_one::<String>(ARG_EMAIL_FROM)
                .cloned()
                .unwrap_or_default(),
            resend_api_key: matches
                .get_one::<String>(ARG_RESEND_API_KEY)
                .filter(|key| !key.trim().is_empty())
                .map(|key| SecretString::from(key.clone())),
            resend_api_url: matches
                .get_one::<String>(ARG_RESEND_API_URL)
                .cloned()
                .unwrap_or_default(),
            timeout_seconds: matches
                .get_one::<u64>(ARG_EMAIL_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
        }
    }
}
