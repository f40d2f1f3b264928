use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_UPLOAD_DIR: &str = "upload-dir";
pub const ARG_UPLOADS_URL: &str = "uploads-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_UPLOAD_DIR)
                .long(ARG_UPLOAD_DIR)
                .help("Directory where uploaded images are stored and served from")
                .env("STUDIO_UPLOAD_DIR")
                .default_value("uploads")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_UPLOADS_URL)
                .long(ARG_UPLOADS_URL)
                .help("Public URL prefix of the upload directory")
                .env("STUDIO_UPLOADS_URL")
                .default_value("/uploads"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub upload_dir: PathBuf,
    pub uploads_url: String,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            upload_dir: matches
                .get_one::<PathBuf>(ARG_UPLOAD_DIR)
                .cloned()
                .unwrap_or_else(|| PathBuf::from("uploads")),
            uploads_url: matches
                .get_one::<String>(ARG_UPLOADS_URL)
                .cloned()
                .unwrap_or_else(|| "/uploads".to_string()),
        }
    }
}
