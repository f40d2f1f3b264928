//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an [`Action`]: the HTTP server by default,
//! or `provision-admin` when that subcommand is given.

use crate::cli::actions::{Action, provision, server};
use crate::cli::commands::{
    ARG_DSN, ARG_MIGRATE, ARG_PORT, ARG_PROVISION_EMAIL, ARG_PROVISION_PASSWORD,
    CMD_PROVISION_ADMIN, auth, email, storage,
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if let Some((CMD_PROVISION_ADMIN, sub_matches)) = matches.subcommand() {
        return provision_handler(sub_matches);
    }

    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = dsn(matches)?;

    let auth_opts = auth::Options::parse(matches)?;
    let email_opts = email::Options::parse(matches);
    let storage_opts = storage::Options::parse(matches);

    let jwt_secret = auth_opts
        .jwt_secret
        .context("missing required argument: --jwt-secret")?;

    Ok(Action::Server(server::Args {
        port,
        dsn,
        migrate: matches.get_flag(ARG_MIGRATE),
        base_url: auth_opts.base_url,
        jwt_secret,
        admin_email: auth_opts.admin_email,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        reset_ttl_seconds: auth_opts.reset_ttl_seconds,
        bootstrap_mode: auth_opts.bootstrap_mode,
        email_from: email_opts.from,
        resend_api_key: email_opts.resend_api_key,
        resend_api_url: email_opts.resend_api_url,
        email_timeout_seconds: email_opts.timeout_seconds,
        upload_dir: storage_opts.upload_dir,
        uploads_url: storage_opts.uploads_url,
    }))
}

fn provision_handler(matches: &clap::ArgMatches) -> Result<Action> {
    let email = matches
        .get_one::<String>(ARG_PROVISION_EMAIL)
        .cloned()
        .context("missing required argument: --email")?;
    let password = matches
        .get_one::<String>(ARG_PROVISION_PASSWORD)
        .map(|password| SecretString::from(password.clone()))
        .context("missing required argument: --password")?;

    Ok(Action::ProvisionAdmin(provision::Args {
        dsn: dsn(matches)?,
        migrate: matches.get_flag(ARG_MIGRATE),
        email,
        password,
    }))
}

fn dsn(matches: &clap::ArgMatches) -> Result<String> {
    matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::BootstrapMode;
    use secrecy::ExposeSecret;

    const CLEARED: [(&str, Option<&str>); 6] = [
        ("STUDIO_DSN", None),
        ("STUDIO_JWT_SECRET", None),
        ("STUDIO_BOOTSTRAP_MODE", None),
        ("STUDIO_ADMIN_EMAIL", None),
        ("STUDIO_RESEND_API_KEY", None),
        ("STUDIO_MIGRATE", None),
    ];

    fn matches(args: &[&str]) -> clap::ArgMatches {
        let mut argv = vec!["studio-admin"];
        argv.extend_from_slice(args);
        crate::cli::commands::new().get_matches_from(argv)
    }

    #[test]
    fn dsn_required() {
        temp_env::with_vars(CLEARED, || {
            let result = handler(&matches(&["--jwt-secret", "secret"]));
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("missing required argument: --dsn"));
            }
        });
    }

    #[test]
    fn jwt_secret_required_for_server() {
        temp_env::with_vars(CLEARED, || {
            let result = handler(&matches(&["--dsn", "memory://", "--jwt-secret", "   "]));
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(
                    err.to_string()
                        .contains("missing required argument: --jwt-secret")
                );
            }
        });
    }

    #[test]
    fn server_action_from_args() -> anyhow::Result<()> {
        temp_env::with_vars(CLEARED, || {
            let action = handler(&matches(&[
                "--dsn",
                "memory://",
                "--jwt-secret",
                "secret",
                "--admin-email",
                " owner@studio.test ",
                "--bootstrap-mode",
                "disabled",
                "--session-ttl-seconds",
                "3600",
            ]))?;
            let Action::Server(args) = action else {
                anyhow::bail!("expected server action");
            };
            assert_eq!(args.dsn, "memory://");
            assert_eq!(args.port, 8080);
            assert!(!args.migrate);
            assert_eq!(args.jwt_secret.expose_secret(), "secret");
            assert_eq!(args.admin_email.as_deref(), Some("owner@studio.test"));
            assert_eq!(args.bootstrap_mode, BootstrapMode::Disabled);
            assert_eq!(args.session_ttl_seconds, 3600);
            assert_eq!(args.reset_ttl_seconds, 900);
            assert!(args.resend_api_key.is_none());
            assert_eq!(args.uploads_url, "/uploads");
            Ok(())
        })
    }

    #[test]
    fn provision_action_from_args() -> anyhow::Result<()> {
        temp_env::with_vars(CLEARED, || {
            let action = handler(&matches(&[
                "--migrate",
                "provision-admin",
                "--dsn",
                "postgres://localhost/studio",
                "--email",
                "owner@studio.test",
                "--password",
                "correct horse",
            ]))?;
            let Action::ProvisionAdmin(args) = action else {
                anyhow::bail!("expected provision action");
            };
            assert_eq!(args.dsn, "postgres://localhost/studio");
            assert!(args.migrate);
            assert_eq!(args.email, "owner@studio.test");
            assert_eq!(args.password.expose_secret(), "correct horse");
            Ok(())
        })
    }
}
