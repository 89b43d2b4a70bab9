//! `jararaca key`: the cache key of a query under the configured root keys.

use serde_json::Value;

use jararaca_config::Config;
use jararaca_core::QueryKey;
use jararaca_core::query_key::{base_key, infinite_base_key, infinite_key, key};

use super::parse_value;
use crate::cli::{GlobalOpts, KeyArgs};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &KeyArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let key = build_key(args, &config.root_query_keys());
    tracing::debug!(key = %key, "built query key");
    let rendered = output::render_value(global.output, &Value::Array(key.segments().to_vec()))?;
    Ok(output::print_output(&rendered)?)
}

fn build_key(args: &KeyArgs, prefix: &[Value]) -> QueryKey {
    let values: Vec<Value> = args.args.iter().map(|raw| parse_value(raw)).collect();
    match (args.infinite, args.base) {
        (false, false) => key(prefix, &args.class, &args.method, &values),
        (true, false) => infinite_key(prefix, &args.class, &args.method, &values),
        (false, true) => base_key(prefix, &args.class, &args.method),
        (true, true) => infinite_base_key(prefix, &args.class, &args.method),
    }
}
