use std::{collections::BTreeMap, io::Write};

use serde::Serialize;
use serde_json::Value;
use tickreplay::{
    query_seqs, ChainParser, OperatorRegistry, Query, Record, ReplayConfig, ReplayOptions, Time,
};

use crate::{
    config::ReplayCliConfig,
    scenario::{Point, Scenario},
};

#[derive(Serialize)]
struct OutputLine<'a> {
    query: &'a str,
    timestamp: Time,
    value: &'a Value,
}

pub fn replay(
    cli: &ReplayCliConfig,
    config: &ReplayConfig,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let scenario = Scenario::load(&cli.input)?;
    tracing::info!(
        input = ?cli.input,
        series = scenario.series.len(),
        queries = scenario.queries.len(),
        "Replaying scenario"
    );
    run_scenario(scenario, config, cli.merged, out)
}

/// Replays every query of `scenario`, writing one JSON line per record.
pub fn run_scenario(
    scenario: Scenario,
    config: &ReplayConfig,
    merged: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let Scenario { series, queries } = scenario;
    let options = ReplayOptions::<Point, Point>::new()
        .with_timestamp(|point: &Point| point.0)
        .with_payload(|(_, value): Point| value)
        .with_seq_generator(move |pattern: &str| -> anyhow::Result<Vec<Point>> {
            series
                .get(pattern)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown series `{pattern}`"))
        });
    let options = config.apply(options);

    let inputs = queries
        .iter()
        .map(|query| (Query::text(query.as_str()), None::<Vec<Point>>));
    let replay = query_seqs(
        inputs,
        options,
        &ChainParser,
        &OperatorRegistry::with_builtins(),
    )?;

    // Records are pulled in clock order so that each one carries the time it
    // was produced, then grouped per query unless merged output was requested.
    let mut grouped: BTreeMap<String, Vec<Record<Value>>> = BTreeMap::new();
    for item in replay.merged() {
        let (query, record) = item?;
        if merged {
            write_record(out, &query, &record)?;
        } else {
            grouped.entry(query).or_default().push(record);
        }
    }
    for query in &queries {
        // repeated queries share one result sequence
        let Some(records) = grouped.remove(query) else {
            continue;
        };
        for record in &records {
            write_record(out, query, record)?;
        }
    }
    tracing::debug!(queries = queries.len(), "Scenario replay finished");
    Ok(())
}

fn write_record(out: &mut impl Write, query: &str, record: &Record<Value>) -> anyhow::Result<()> {
    let line = OutputLine {
        query,
        timestamp: record.timestamp,
        value: &record.value,
    };
    serde_json::to_writer(&mut *out, &line)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use testresult::TestResult;

    fn scenario(queries: &[&str]) -> Scenario {
        Scenario {
            series: [
                ("a".to_owned(), vec![(1, json!("a1")), (3, json!("a3"))]),
                ("b".to_owned(), vec![(2, json!("b2"))]),
            ]
            .into_iter()
            .collect(),
            queries: queries.iter().map(|q| q.to_string()).collect(),
        }
    }

    fn lines(out: Vec<u8>) -> Vec<Value> {
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test_log::test]
    fn test_per_query_output() -> TestResult {
        let mut out = Vec::new();
        run_scenario(scenario(&["a", "b"]), &ReplayConfig::default(), false, &mut out)?;
        assert_eq!(
            lines(out),
            vec![
                json!({"query": "a", "timestamp": 1, "value": "a1"}),
                json!({"query": "a", "timestamp": 3, "value": "a3"}),
                json!({"query": "b", "timestamp": 2, "value": "b2"}),
            ]
        );
        Ok(())
    }

    #[test_log::test]
    fn test_merged_output_is_clock_ordered() -> TestResult {
        let mut out = Vec::new();
        run_scenario(scenario(&["a", "b"]), &ReplayConfig::default(), true, &mut out)?;
        let timestamps: Vec<_> = lines(out).iter().map(|l| l["timestamp"].clone()).collect();
        assert_eq!(timestamps, vec![json!(1), json!(2), json!(3)]);
        Ok(())
    }

    #[test_log::test]
    fn test_unknown_series_fails() {
        let mut out = Vec::new();
        let err = run_scenario(scenario(&["missing"]), &ReplayConfig::default(), false, &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(out.is_empty());
    }

    #[test_log::test]
    fn test_config_period_reaches_operators() -> TestResult {
        let config = ReplayConfig {
            period: Some(2),
            ..Default::default()
        };
        let mut out = Vec::new();
        run_scenario(scenario(&["a.sample()"]), &config, false, &mut out)?;
        assert_eq!(
            lines(out),
            vec![
                json!({"query": "a.sample()", "timestamp": 2, "value": "a1"}),
                json!({"query": "a.sample()", "timestamp": 4, "value": "a3"}),
            ]
        );
        Ok(())
    }
}
