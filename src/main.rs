//! Purpose: `zapi` CLI entry point; a thin JSON-speaking shell over the object facade.
//! Role: Binary crate root; parses args, builds the session config, emits JSON on stdout.
//! Invariants: Errors are emitted as JSON on stderr (plain text on a terminal).
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Writes always carry the version the user passed; the CLI never guesses one.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use zapi::api::{Error, ErrorKind, LibraryScope, ObjectKind, SessionConfig, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome { exit_code });
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(clap_error_summary(&err)));
            }
        },
    };
    command_dispatch::dispatch_command(cli)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let replacement = arg.to_str().and_then(|value| match value {
                "---help" => Some("--help"),
                "---version" => Some("--version"),
                _ => None,
            });
            replacement.map(OsString::from).unwrap_or(arg)
        })
        .collect()
}

#[derive(Parser)]
#[command(
    name = "zapi",
    version,
    about = "Versioned library sync client",
    long_about = None,
    after_help = r#"EXAMPLES
  $ zapi --user 1 keys item
  $ zapi --user 1 create item '{"itemType": "book", "title": "A"}'
  $ zapi --user 1 get item ABCD2345 --format atom
  $ zapi --user 1 patch item ABCD2345 --version 12 '{"title": "B"}'
  $ zapi --user 1 deleted --since 12

CONFIGURATION
  ZAPI_BASE_URL, ZAPI_API_KEY, ZAPI_API_VERSION, ZAPI_SCHEMA_VERSION,
  ZAPI_TIMEOUT_MS, ZAPI_ROOT_USER, ZAPI_ROOT_PASSWORD, or --config <file.json>."#,
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    #[arg(long, global = true, help = "Config file (JSON)", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "API base URL (overrides ZAPI_BASE_URL)")]
    base_url: Option<String>,
    #[arg(long, global = true, help = "API key (overrides ZAPI_API_KEY)")]
    api_key: Option<String>,
    #[arg(long, global = true, help = "Pin a schema version")]
    schema_version: Option<u32>,
    #[arg(long, global = true, conflicts_with = "group", help = "User library id")]
    user: Option<u64>,
    #[arg(long, global = true, help = "Group library id")]
    group: Option<u64>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

impl Cli {
    pub(crate) fn session_config(&self) -> Result<SessionConfig, Error> {
        let mut config =
            SessionConfig::from_layers(self.config.as_deref(), self.base_url.as_deref())?;
        if let Some(api_key) = &self.api_key {
            config = config.with_api_key(api_key.clone());
        }
        if let Some(version) = self.schema_version {
            config = config.with_schema_version(version);
        }
        Ok(config)
    }

    pub(crate) fn scope(&self) -> Result<LibraryScope, Error> {
        match (self.user, self.group) {
            (Some(id), None) => Ok(LibraryScope::User(id)),
            (None, Some(id)) => Ok(LibraryScope::Group(id)),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message("exactly one of --user or --group is required")),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum KindArg {
    Item,
    Collection,
    Search,
}

impl From<KindArg> for ObjectKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Item => ObjectKind::Item,
            KindArg::Collection => ObjectKind::Collection,
            KindArg::Search => ObjectKind::Search,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub(crate) struct TargetArgs {
    #[arg(value_enum, help = "Object kind")]
    pub(crate) kind: KindArg,
    #[arg(help = "8-character object key")]
    pub(crate) key: String,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    #[command(about = "Read one object")]
    Get {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, default_value = "json", help = "Output format: json|atom|raw")]
        format: String,
    },
    #[command(about = "List object keys")]
    Keys {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long, help = "Only objects modified after this library version")]
        since: Option<u64>,
    },
    #[command(about = "List object versions keyed by object key")]
    Versions {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
    #[command(about = "Show keys deleted since a library version")]
    Deleted {
        #[arg(long)]
        since: u64,
    },
    #[command(about = "Create objects from a JSON object or array")]
    Create {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(help = "JSON payload")]
        data: String,
        #[arg(long, help = "Expected library version")]
        version: Option<u64>,
    },
    #[command(about = "Replace one object (PUT); --version 0 creates it under the key")]
    Update {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(help = "JSON payload")]
        data: String,
        #[arg(long, help = "Expected object version")]
        version: Option<u64>,
    },
    #[command(about = "Merge fields into one object (PATCH)")]
    Patch {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(help = "JSON payload")]
        data: String,
        #[arg(long, help = "Expected object version")]
        version: Option<u64>,
    },
    #[command(about = "Delete one object")]
    Delete {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, help = "Expected object version")]
        version: Option<u64>,
    },
    #[command(
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ zapi completion bash > ~/.local/share/bash-completion/completions/zapi"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", err.kind()))
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(version) = err.library_version() {
        inner.insert("libraryVersion".to_string(), json!(version));
    }
    if let Some(body) = err.body() {
        inner.insert("body".to_string(), json!(body));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
