//! JSON lines プロトコルを話す決定的なモックソルバ
//!
//! 実ネットワークは使わず、Stop を RouteName ごとにまとめて 1 ルートとする。
//! Sequence 最小の Stop が FirstStopOID、最大が LastStopOID になる。
//! `solve_large_route_pairs` の CLI テストと手元での動作確認用。

use std::collections::HashSet;
use std::io::{self, BufRead, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser as _;
use route_pairs_core::engine::{Reply, Request, Stop};
use route_pairs_core::properties::PropertyMap;
use route_pairs_core::table::{Field, FieldType, Schema, Table};
use serde_json::{Value, json};

#[derive(clap::Parser, Debug)]
#[command(about = "deterministic JSON-lines route solver for testing")]
struct Cli {
    /// Report every solve as "no route found"
    #[arg(long)]
    fail_all: bool,

    /// Reject `set` requests for this property (may be repeated)
    #[arg(long = "reject")]
    reject: Vec<String>,

    /// Minutes assigned to every route
    #[arg(long, default_value_t = 1.5)]
    minutes: f64,
}

fn default_properties() -> PropertyMap {
    [
        ("searchTolerance", json!(5000)),
        ("searchToleranceUnits", json!("Meters")),
        ("returnDirections", json!(false)),
        ("travelMode", json!("Driving Time")),
        ("timeUnits", json!("Minutes")),
        ("distanceUnits", json!("Miles")),
        ("timeOfDay", Value::Null),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn solve(stops: &[Stop], minutes: f64) -> Result<(Table, Table)> {
    let mut stops_table = Table::new(Schema::new(vec![
        Field::new("ObjectID", FieldType::Oid),
        Field::new("RouteName", FieldType::Text),
        Field::new("Sequence", FieldType::Integer),
        Field::new("OriginUniqueID", FieldType::Text),
        Field::new("DestinationUniqueID", FieldType::Text),
    ]));
    for (i, s) in stops.iter().enumerate() {
        stops_table.push_row(vec![
            json!(i + 1),
            json!(s.route_name),
            json!(s.sequence),
            s.origin_unique_id.clone(),
            s.destination_unique_id.clone(),
        ])?;
    }

    // 出現順に RouteName を並べる
    let mut names: Vec<&str> = Vec::new();
    for s in stops {
        if !names.contains(&s.route_name.as_str()) {
            names.push(&s.route_name);
        }
    }
    let mut routes = Table::new(Schema::new(vec![
        Field::new("Name", FieldType::Text),
        Field::new("FirstStopOID", FieldType::Integer),
        Field::new("LastStopOID", FieldType::Integer),
        Field::new("Total_Minutes", FieldType::Double),
    ]));
    for name in names {
        let members = || {
            stops
                .iter()
                .enumerate()
                .filter(move |(_, s)| s.route_name == name)
        };
        let first = members().min_by_key(|(_, s)| s.sequence).map(|(i, _)| i + 1);
        let last = members().max_by_key(|(_, s)| s.sequence).map(|(i, _)| i + 1);
        routes.push_row(vec![json!(name), json!(first), json!(last), json!(minutes)])?;
    }
    Ok((routes, stops_table))
}

fn handle(cli: &Cli, reject: &HashSet<&str>, req: Request) -> Result<Option<Reply>> {
    let reply = match req {
        Request::Init { .. } => Reply::Ready {
            defaults: default_properties(),
        },
        Request::Set { name, .. } => {
            if reject.contains(name.as_str()) {
                Reply::Error {
                    message: format!("unsupported value for {name}"),
                }
            } else {
                Reply::Ok
            }
        }
        Request::Solve { stops, .. } => {
            if cli.fail_all {
                Reply::Solved {
                    succeeded: false,
                    messages: vec!["No route found".to_string()],
                    routes: None,
                    stops: None,
                }
            } else {
                let (routes, stops_table) = solve(&stops, cli.minutes)?;
                Reply::Solved {
                    succeeded: true,
                    messages: vec![format!("Solved {} stops", stops.len())],
                    routes: Some(routes),
                    stops: Some(stops_table),
                }
            }
        }
        Request::Quit => return Ok(None),
    };
    Ok(Some(reply))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let reject: HashSet<&str> = cli.reject.iter().map(String::as_str).collect();

    let stdin = io::stdin();
    let mut out = BufWriter::new(io::stdout().lock());
    for line in stdin.lock().lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Request>(&line) {
            Ok(req) => match handle(&cli, &reject, req)? {
                Some(reply) => reply,
                None => break,
            },
            Err(e) => Reply::Error {
                message: format!("malformed request: {e}"),
            },
        };
        serde_json::to_writer(&mut out, &reply)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }
    Ok(())
}
