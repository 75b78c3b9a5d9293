//! Purpose: Run parsed CLI commands against the object facade and render JSON results.
//! Role: Binary-only glue; owns the tokio runtime and the kind-to-type dispatch.
//! Invariants: Each invocation uses one client session and issues requests in order.
//! Invariants: Output shapes are plain JSON values; batch outcomes keep every index.
use std::io::{self, IsTerminal};

use clap::CommandFactory;
use serde_json::{Map, Value, json};

use super::{Cli, Command, KindArg, RunOutcome, TargetArgs};
use zapi::api::{
    BatchOutcome, Client, Decoded, Error, ErrorKind, Format, HttpTransport, ListParams,
    ObjectData, ObjectKey, Objects, Precondition, View, WriteAck, WriteOptions,
};

pub(super) fn dispatch_command(cli: Cli) -> Result<RunOutcome, Error> {
    if let Command::Completion { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::aot::generate(*shell, &mut cmd, "zapi", &mut io::stdout());
        return Ok(RunOutcome::ok());
    }

    let config = cli.session_config()?;
    let scope = cli.scope()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;
    let library = Client::new(config).library(scope);

    let value = runtime.block_on(async {
        if let Command::Deleted { since } = cli.command {
            let log = library.deleted(since).await?;
            return serde_json::to_value(log).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode deleted log")
                    .with_source(err)
            });
        }
        match command_kind(&cli.command) {
            KindArg::Item => run_object_command(library.items(), &cli.command).await,
            KindArg::Collection => {
                run_object_command(library.collections(), &cli.command).await
            }
            KindArg::Search => run_object_command(library.searches(), &cli.command).await,
        }
    })?;
    emit_json(value);
    Ok(RunOutcome::ok())
}

fn command_kind(command: &Command) -> KindArg {
    match command {
        Command::Get { target, .. }
        | Command::Update { target, .. }
        | Command::Patch { target, .. }
        | Command::Delete { target, .. } => target.kind,
        Command::Keys { kind, .. }
        | Command::Versions { kind, .. }
        | Command::Create { kind, .. } => *kind,
        Command::Deleted { .. } | Command::Completion { .. } => KindArg::Item,
    }
}

async fn run_object_command<D: ObjectData>(
    objects: Objects<HttpTransport, D>,
    command: &Command,
) -> Result<Value, Error> {
    match command {
        Command::Get { target, format } => {
            let format = format.parse::<Format>()?;
            let decoded = objects.get(&target_key(target)?, format).await?;
            decoded_json(decoded)
        }
        Command::Keys { since, .. } => {
            let mut params = ListParams::new();
            params.since = *since;
            let keys = objects.keys(&View::All, &params).await?;
            Ok(json!(keys.iter().map(ObjectKey::as_str).collect::<Vec<_>>()))
        }
        Command::Versions { since, .. } => {
            let params = ListParams::new().since(*since);
            let versions = objects.versions(&View::All, &params).await?;
            Ok(json!(versions))
        }
        Command::Create { data, version, .. } => {
            let payload = parse_payload(data)?;
            let values = match payload {
                Value::Array(values) => values,
                other => vec![other],
            };
            let parsed = values
                .into_iter()
                .map(parse_object::<D>)
                .collect::<Result<Vec<_>, _>>()?;
            let options = WriteOptions::new().precondition(header_precondition(*version));
            let outcome = objects.write_batch(&parsed, &options).await?;
            Ok(batch_json(&outcome))
        }
        Command::Update {
            target,
            data,
            version,
        } => {
            let object = parse_object::<D>(parse_payload(data)?)?;
            let ack = objects
                .put(&target_key(target)?, object, header_precondition(*version))
                .await?;
            Ok(ack_json(&ack))
        }
        Command::Patch {
            target,
            data,
            version,
        } => {
            let ack = objects
                .patch(
                    &target_key(target)?,
                    parse_payload(data)?,
                    header_precondition(*version),
                )
                .await?;
            Ok(ack_json(&ack))
        }
        Command::Delete { target, version } => {
            let ack = objects
                .delete(&target_key(target)?, header_precondition(*version))
                .await?;
            Ok(ack_json(&ack))
        }
        Command::Deleted { .. } | Command::Completion { .. } => {
            Err(Error::new(ErrorKind::Internal).with_message("not an object command"))
        }
    }
}

fn header_precondition(version: Option<u64>) -> Precondition {
    version.map_or(Precondition::None, Precondition::Header)
}

fn target_key(target: &TargetArgs) -> Result<ObjectKey, Error> {
    ObjectKey::parse(&target.key)
}

fn parse_payload(data: &str) -> Result<Value, Error> {
    serde_json::from_str(data).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("payload is not valid JSON")
            .with_source(err)
    })
}

fn parse_object<D: ObjectData>(value: Value) -> Result<D, Error> {
    serde_json::from_value(value).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("payload does not describe a {}", D::KIND))
            .with_source(err)
    })
}

fn decoded_json(decoded: Decoded) -> Result<Value, Error> {
    let value = match decoded {
        Decoded::Json(value) => value,
        Decoded::Atom(document) => json!(
            document
                .entries()?
                .into_iter()
                .map(|entry| json!({
                    "key": entry.key,
                    "version": entry.version,
                    "content": entry.content,
                }))
                .collect::<Vec<_>>()
        ),
        Decoded::Keys(keys) => json!(keys.iter().map(ObjectKey::as_str).collect::<Vec<_>>()),
        Decoded::Versions(versions) => json!(versions),
        Decoded::Raw(response) => json!({
            "status": response.status,
            "body": response.body,
        }),
    };
    Ok(value)
}

fn ack_json(ack: &WriteAck) -> Value {
    json!({"status": ack.status, "libraryVersion": ack.library_version})
}

fn batch_json(outcome: &BatchOutcome) -> Value {
    let mut success = Map::new();
    for (index, written) in &outcome.success {
        success.insert(
            index.to_string(),
            json!({"key": written.key.as_str(), "version": written.version}),
        );
    }
    let mut unchanged = Map::new();
    for (index, key) in &outcome.unchanged {
        unchanged.insert(index.to_string(), json!(key.as_str()));
    }
    let mut failed = Map::new();
    for (index, failure) in &outcome.failed {
        failed.insert(
            index.to_string(),
            json!({"key": failure.key, "code": failure.code, "message": failure.message}),
        );
    }
    json!({
        "success": success,
        "unchanged": unchanged,
        "failed": failed,
        "libraryVersion": outcome.library_version,
    })
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}
