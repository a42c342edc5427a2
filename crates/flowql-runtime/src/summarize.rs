//! `summarize { ... } [by expr] [over name = window_fn(...) | emit_clause]`
//! (spec §4.6, testable property 8).
//!
//! Windowing and emit-policy triggering are mutually exclusive branches of
//! one stage. Both branches share the same aggregator bookkeeping
//! ([`GroupBag`]/[`AggregatorState`]) and the same output-record shape:
//! `{ group_key?: key, window_var?: { id, start?, end?, type }, ...fields }`
//! (spec §4.6's closing paragraph). `group_key` is the scalar value of the
//! single `by` expression when there is exactly one, or an array when there
//! are several — chosen so scenario S4's `{group_key:"x", ...}` (one `by`
//! expression) comes out as a bare string rather than `["x"]`.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use flowql_core::record::Record;
use flowql_lang::expr::{eval, Env, Expr};
use flowql_lang::plan::{AggregatorSpec, EmitPolicySpec, SummarizeSpec, WindowSpec};
use serde_json::{Map, Value};

use crate::stage::Stage;

/// One running aggregator instance inside a [`GroupBag`].
enum AggregatorState {
    Count(u64),
    Sum { expr: Expr, total: f64 },
    Min { expr: Expr, value: Option<f64> },
    Max { expr: Expr, value: Option<f64> },
    Avg { expr: Expr, total: f64, count: u64 },
}

impl AggregatorState {
    fn new(spec: &AggregatorSpec) -> Self {
        match spec {
            AggregatorSpec::Count => AggregatorState::Count(0),
            AggregatorSpec::Sum(e) => AggregatorState::Sum { expr: e.clone(), total: 0.0 },
            AggregatorSpec::Min(e) => AggregatorState::Min { expr: e.clone(), value: None },
            AggregatorSpec::Max(e) => AggregatorState::Max { expr: e.clone(), value: None },
            AggregatorSpec::Avg(e) => AggregatorState::Avg { expr: e.clone(), total: 0.0, count: 0 },
        }
    }

    fn add(&mut self, record: &Record) {
        let env = Env::new(record);
        match self {
            AggregatorState::Count(n) => *n += 1,
            AggregatorState::Sum { expr, total } => {
                if let Some(n) = numeric(&expr_value(expr, &env)) {
                    *total += n;
                }
            }
            AggregatorState::Min { expr, value } => {
                if let Some(n) = numeric(&expr_value(expr, &env)) {
                    *value = Some(value.map_or(n, |cur| cur.min(n)));
                }
            }
            AggregatorState::Max { expr, value } => {
                if let Some(n) = numeric(&expr_value(expr, &env)) {
                    *value = Some(value.map_or(n, |cur| cur.max(n)));
                }
            }
            AggregatorState::Avg { expr, total, count } => {
                if let Some(n) = numeric(&expr_value(expr, &env)) {
                    *total += n;
                    *count += 1;
                }
            }
        }
    }

    fn finalize(&self) -> Value {
        match self {
            AggregatorState::Count(n) => Value::from(*n),
            AggregatorState::Sum { total, .. } => json_number(*total),
            AggregatorState::Min { value, .. } => value.map(json_number).unwrap_or(Value::Null),
            AggregatorState::Max { value, .. } => value.map(json_number).unwrap_or(Value::Null),
            AggregatorState::Avg { total, count, .. } => {
                if *count == 0 {
                    Value::Null
                } else {
                    json_number(total / *count as f64)
                }
            }
        }
    }
}

fn expr_value(expr: &Expr, env: &Env) -> Record {
    eval(expr, env).unwrap_or(Value::Null)
}

fn numeric(v: &Record) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn json_number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// One group's live aggregator bag.
struct GroupBag {
    key: Record,
    aggs: Vec<(String, AggregatorState)>,
}

impl GroupBag {
    fn new(spec: &SummarizeSpec, key: Record) -> Self {
        Self { key, aggs: spec.fields.iter().map(|(name, a)| (name.clone(), AggregatorState::new(a))).collect() }
    }

    fn add(&mut self, record: &Record) {
        for (_, agg) in &mut self.aggs {
            agg.add(record);
        }
    }

    fn finalize_fields(&self) -> Map<String, Value> {
        self.aggs.iter().map(|(name, agg)| (name.clone(), agg.finalize())).collect()
    }
}

fn group_key_value(spec: &SummarizeSpec, record: &Record) -> Record {
    match &spec.group_key {
        None => Value::Null,
        Some(exprs) => {
            let env = Env::new(record);
            let mut values: Vec<Record> = exprs.iter().map(|e| expr_value(e, &env)).collect();
            if values.len() == 1 {
                values.pop().unwrap()
            } else {
                Value::Array(values)
            }
        }
    }
}

fn group_repr(key: &Record) -> String {
    key.to_string()
}

fn window_value(id: Value, start: Option<Value>, end: Option<Value>, kind: &str) -> Value {
    let mut map = Map::new();
    map.insert("id".into(), id);
    if let Some(s) = start {
        map.insert("start".into(), s);
    }
    if let Some(e) = end {
        map.insert("end".into(), e);
    }
    map.insert("type".into(), Value::String(kind.into()));
    Value::Object(map)
}

fn build_output(spec: &SummarizeSpec, key: &Record, window: Option<Value>, fields: Map<String, Value>) -> Record {
    let mut map = Map::new();
    if spec.group_key.is_some() {
        map.insert("group_key".into(), key.clone());
    }
    if let (Some((name, _)), Some(win)) = (&spec.window, window) {
        map.insert(name.clone(), win);
    }
    for (k, v) in fields {
        map.insert(k, v);
    }
    Value::Object(map)
}

/// The two mutually exclusive finalization strategies (spec §4.6: windows
/// vs. emit policies).
enum Mode {
    Window(WindowState),
    Emit(EmitState),
}

enum WindowState {
    Tumbling { size: u64, index: u64, current_id: Option<u64>, bags: HashMap<String, GroupBag> },
    TumblingBy { size: f64, value_fn: Expr, current_id: Option<i64>, bags: HashMap<String, GroupBag> },
    Hopping { size: u64, hop: u64, index: u64, bags: HashMap<u64, HashMap<String, GroupBag>> },
    HoppingBy { size: f64, hop: f64, value_fn: Expr, bags: HashMap<i64, HashMap<String, GroupBag>> },
    Sliding { size: u64, index: u64, buffer: VecDeque<Record> },
    SlidingBy { size: f64, value_fn: Expr, buffer: VecDeque<(f64, Record)> },
    CountWindow { n: u64, index: u64, current_id: Option<u64>, bags: HashMap<String, GroupBag> },
    Session { timeout: f64, value_fn: Expr, seq: u64, sessions: HashMap<String, (u64, f64, f64, GroupBag)> },
}

struct EmitState {
    policy: EmitPolicySpec,
    bags: HashMap<String, GroupBag>,
    record_count: u64,
    last_emit_count: u64,
    last_emit_value: Option<f64>,
    prev_group: Option<String>,
    prev_change_value: Option<Record>,
    seen_first: bool,
}

pub struct Summarize {
    spec: SummarizeSpec,
    mode: Mode,
}

impl Summarize {
    pub fn new(spec: SummarizeSpec) -> Self {
        let mode = if let Some((_, window)) = &spec.window {
            Mode::Window(match window {
                WindowSpec::Tumbling { size } => WindowState::Tumbling { size: *size, index: 0, current_id: None, bags: HashMap::new() },
                WindowSpec::TumblingBy { size, value_fn } => {
                    WindowState::TumblingBy { size: *size, value_fn: value_fn.clone(), current_id: None, bags: HashMap::new() }
                }
                WindowSpec::Hopping { size, hop } => WindowState::Hopping { size: *size, hop: *hop, index: 0, bags: HashMap::new() },
                WindowSpec::HoppingBy { size, hop, value_fn } => {
                    WindowState::HoppingBy { size: *size, hop: *hop, value_fn: value_fn.clone(), bags: HashMap::new() }
                }
                WindowSpec::Sliding { size } => WindowState::Sliding { size: *size, index: 0, buffer: VecDeque::new() },
                WindowSpec::SlidingBy { size, value_fn } => {
                    WindowState::SlidingBy { size: *size, value_fn: value_fn.clone(), buffer: VecDeque::new() }
                }
                WindowSpec::CountWindow { n } => WindowState::CountWindow { n: *n, index: 0, current_id: None, bags: HashMap::new() },
                WindowSpec::SessionWindow { timeout, value_fn } => {
                    WindowState::Session { timeout: *timeout, value_fn: value_fn.clone(), seq: 0, sessions: HashMap::new() }
                }
            })
        } else {
            let policy = spec.emit.clone().unwrap_or(EmitPolicySpec::OnUpdate);
            Mode::Emit(EmitState {
                policy,
                bags: HashMap::new(),
                record_count: 0,
                last_emit_count: 0,
                last_emit_value: None,
                prev_group: None,
                prev_change_value: None,
                seen_first: false,
            })
        };
        Self { spec, mode }
    }

    fn process_record(&mut self, record: Record) -> Vec<Record> {
        let spec = &self.spec;
        match &mut self.mode {
            Mode::Window(state) => process_window(spec, state, record),
            Mode::Emit(state) => process_emit(spec, state, record),
        }
    }

    fn flush_state(&mut self) -> Vec<Record> {
        let spec = &self.spec;
        match &mut self.mode {
            Mode::Window(state) => flush_window(spec, state),
            Mode::Emit(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl Stage for Summarize {
    async fn process(&mut self, record: Record) -> Vec<Record> {
        self.process_record(record)
    }

    async fn flush(&mut self) -> Vec<Record> {
        self.flush_state()
    }
}

fn close_count_bags(spec: &SummarizeSpec, bags: HashMap<String, GroupBag>, id: u64, size: u64, kind: &str) -> Vec<Record> {
    let start = id * size;
    let end = start + size - 1;
    bags.into_values()
        .map(|bag| {
            let key = bag.key.clone();
            let fields = bag.finalize_fields();
            build_output(spec, &key, Some(window_value(Value::from(id), Some(Value::from(start)), Some(Value::from(end)), kind)), fields)
        })
        .collect()
}

fn finalize_hopping_bags(spec: &SummarizeSpec, group_bags: HashMap<String, GroupBag>, id: u64, hop: u64, size: u64) -> Vec<Record> {
    let start = id * hop;
    let end = start + size - 1;
    group_bags
        .into_values()
        .map(|bag| {
            let key = bag.key.clone();
            let fields = bag.finalize_fields();
            build_output(spec, &key, Some(window_value(Value::from(id), Some(Value::from(start)), Some(Value::from(end)), "hopping")), fields)
        })
        .collect()
}

fn process_window(spec: &SummarizeSpec, state: &mut WindowState, record: Record) -> Vec<Record> {
    match state {
        WindowState::Tumbling { size, index, current_id, bags } => {
            let id = *index / *size;
            *index += 1;
            let mut out = Vec::new();
            if current_id.is_some() && *current_id != Some(id) {
                let prev_id = current_id.unwrap();
                out.extend(close_count_bags(spec, std::mem::take(bags), prev_id, *size, "tumbling"));
            }
            *current_id = Some(id);
            let key = group_key_value(spec, &record);
            let repr = group_repr(&key);
            bags.entry(repr).or_insert_with(|| GroupBag::new(spec, key)).add(&record);
            out
        }
        WindowState::CountWindow { n, index, current_id, bags } => {
            let id = *index / *n;
            *index += 1;
            let mut out = Vec::new();
            if current_id.is_some() && *current_id != Some(id) {
                let prev_id = current_id.unwrap();
                out.extend(close_count_bags(spec, std::mem::take(bags), prev_id, *n, "count"));
            }
            *current_id = Some(id);
            let key = group_key_value(spec, &record);
            let repr = group_repr(&key);
            bags.entry(repr).or_insert_with(|| GroupBag::new(spec, key)).add(&record);
            out
        }
        WindowState::TumblingBy { size, value_fn, current_id, bags } => {
            let env = Env::new(&record);
            let value = numeric(&expr_value(value_fn, &env)).unwrap_or(0.0);
            let id = (value / *size).floor() as i64;
            let mut out = Vec::new();
            if current_id.is_some() && *current_id != Some(id) {
                let prev_id = current_id.unwrap();
                let start = prev_id as f64 * *size;
                out.extend(bags.drain().map(|(_, bag)| {
                    let key = bag.key.clone();
                    let fields = bag.finalize_fields();
                    build_output(
                        spec,
                        &key,
                        Some(window_value(Value::from(prev_id), Some(json_number(start)), Some(json_number(start + *size)), "tumbling_by")),
                        fields,
                    )
                }));
            }
            *current_id = Some(id);
            let key = group_key_value(spec, &record);
            let repr = group_repr(&key);
            bags.entry(repr).or_insert_with(|| GroupBag::new(spec, key)).add(&record);
            out
        }
        WindowState::Hopping { size, hop, index, bags } => {
            let i = *index;
            *index += 1;
            let id_max = i / *hop;
            let id_min = if i >= *size { (i - *size) / *hop + 1 } else { 0 };
            for id in id_min..=id_max {
                if id * *hop <= i && i < id * *hop + *size {
                    bags.entry(id).or_insert_with(HashMap::new);
                }
            }
            let key = group_key_value(spec, &record);
            let repr = group_repr(&key);
            for (&id, group_bags) in bags.iter_mut() {
                if id * *hop <= i && i < id * *hop + *size {
                    group_bags.entry(repr.clone()).or_insert_with(|| GroupBag::new(spec, key.clone())).add(&record);
                }
            }
            let closing: Vec<u64> = bags.iter().filter(|(&id, _)| i + 1 >= id * *hop + *size).map(|(&id, _)| id).collect();
            let mut out = Vec::new();
            for id in closing {
                if let Some(group_bags) = bags.remove(&id) {
                    out.extend(finalize_hopping_bags(spec, group_bags, id, *hop, *size));
                }
            }
            out
        }
        WindowState::HoppingBy { size, hop, value_fn, bags } => {
            let env = Env::new(&record);
            let value = numeric(&expr_value(value_fn, &env)).unwrap_or(0.0);
            let id_max = (value / *hop).floor() as i64;
            let id_min = ((value - *size) / *hop).floor() as i64 + 1;
            for id in id_min..=id_max {
                let start = id as f64 * *hop;
                if start <= value && value < start + *size {
                    bags.entry(id).or_insert_with(HashMap::new);
                }
            }
            let key = group_key_value(spec, &record);
            let repr = group_repr(&key);
            let ids: Vec<i64> = bags.keys().cloned().collect();
            for id in ids {
                let start = id as f64 * *hop;
                if start <= value && value < start + *size {
                    bags.get_mut(&id).unwrap().entry(repr.clone()).or_insert_with(|| GroupBag::new(spec, key.clone())).add(&record);
                }
            }
            let closing: Vec<i64> = bags.keys().cloned().filter(|&id| value >= id as f64 * *hop + *size).collect();
            let mut out = Vec::new();
            for id in closing {
                if let Some(group_bags) = bags.remove(&id) {
                    let start = id as f64 * *hop;
                    out.extend(group_bags.into_values().map(|bag| {
                        let key = bag.key.clone();
                        let fields = bag.finalize_fields();
                        build_output(
                            spec,
                            &key,
                            Some(window_value(Value::from(id), Some(json_number(start)), Some(json_number(start + *size)), "hopping_by")),
                            fields,
                        )
                    }));
                }
            }
            out
        }
        WindowState::Sliding { size, index, buffer } => {
            let i = *index;
            *index += 1;
            buffer.push_back(record);
            if buffer.len() as u64 > *size {
                buffer.pop_front();
            }
            if buffer.len() as u64 == *size {
                emit_sliding_snapshot(spec, buffer, i, *size)
            } else {
                Vec::new()
            }
        }
        WindowState::SlidingBy { size, value_fn, buffer } => {
            let env = Env::new(&record);
            let value = numeric(&expr_value(value_fn, &env)).unwrap_or(0.0);
            buffer.push_back((value, record));
            while let Some((front_value, _)) = buffer.front() {
                if value - *front_value > *size {
                    buffer.pop_front();
                } else {
                    break;
                }
            }
            emit_sliding_by_snapshot(spec, buffer, value, *size)
        }
        WindowState::Session { timeout, value_fn, seq, sessions } => {
            let env = Env::new(&record);
            let value = numeric(&expr_value(value_fn, &env)).unwrap_or(0.0);
            let key = group_key_value(spec, &record);
            let repr = group_repr(&key);
            let mut out = Vec::new();
            let should_close = sessions.get(&repr).map(|(_, _, last, _)| value - last > *timeout).unwrap_or(false);
            if should_close {
                if let Some((id, start, last, bag)) = sessions.remove(&repr) {
                    let bag_key = bag.key.clone();
                    let fields = bag.finalize_fields();
                    out.push(build_output(
                        spec,
                        &bag_key,
                        Some(window_value(Value::from(id), Some(json_number(start)), Some(json_number(last)), "session")),
                        fields,
                    ));
                }
            }
            let entry = sessions.entry(repr).or_insert_with(|| {
                *seq += 1;
                (*seq, value, value, GroupBag::new(spec, key.clone()))
            });
            entry.1 = entry.1.min(value);
            entry.2 = value;
            entry.3.add(&record);
            out
        }
    }
}

fn emit_sliding_snapshot(spec: &SummarizeSpec, buffer: &VecDeque<Record>, index: u64, size: u64) -> Vec<Record> {
    let mut per_group: HashMap<String, GroupBag> = HashMap::new();
    for record in buffer {
        let key = group_key_value(spec, record);
        let repr = group_repr(&key);
        per_group.entry(repr).or_insert_with(|| GroupBag::new(spec, key)).add(record);
    }
    let start = index + 1 - size;
    per_group
        .into_values()
        .map(|bag| {
            let key = bag.key.clone();
            let fields = bag.finalize_fields();
            build_output(spec, &key, Some(window_value(Value::from(index), Some(Value::from(start)), Some(Value::from(index)), "sliding")), fields)
        })
        .collect()
}

fn emit_sliding_by_snapshot(spec: &SummarizeSpec, buffer: &VecDeque<(f64, Record)>, current_value: f64, size: f64) -> Vec<Record> {
    let mut per_group: HashMap<String, GroupBag> = HashMap::new();
    for (_, record) in buffer {
        let key = group_key_value(spec, record);
        let repr = group_repr(&key);
        per_group.entry(repr).or_insert_with(|| GroupBag::new(spec, key)).add(record);
    }
    per_group
        .into_values()
        .map(|bag| {
            let key = bag.key.clone();
            let fields = bag.finalize_fields();
            build_output(
                spec,
                &key,
                Some(window_value(
                    json_number(current_value),
                    Some(json_number(current_value - size)),
                    Some(json_number(current_value)),
                    "sliding_by",
                )),
                fields,
            )
        })
        .collect()
}

fn flush_window(spec: &SummarizeSpec, state: &mut WindowState) -> Vec<Record> {
    match state {
        WindowState::Tumbling { size, current_id, bags, .. } => match current_id.take() {
            Some(id) => close_count_bags(spec, std::mem::take(bags), id, *size, "tumbling"),
            None => Vec::new(),
        },
        WindowState::CountWindow { n, current_id, bags, .. } => match current_id.take() {
            Some(id) => close_count_bags(spec, std::mem::take(bags), id, *n, "count"),
            None => Vec::new(),
        },
        WindowState::TumblingBy { size, current_id, bags, .. } => match current_id.take() {
            Some(id) => {
                let start = id as f64 * *size;
                bags.drain()
                    .map(|(_, bag)| {
                        let key = bag.key.clone();
                        let fields = bag.finalize_fields();
                        build_output(
                            spec,
                            &key,
                            Some(window_value(Value::from(id), Some(json_number(start)), Some(json_number(start + *size)), "tumbling_by")),
                            fields,
                        )
                    })
                    .collect()
            }
            None => Vec::new(),
        },
        WindowState::Hopping { size, hop, bags, .. } => {
            let (size, hop) = (*size, *hop);
            let mut out = Vec::new();
            for (id, group_bags) in bags.drain() {
                out.extend(finalize_hopping_bags(spec, group_bags, id, hop, size));
            }
            out
        }
        WindowState::HoppingBy { size, hop, bags, .. } => {
            let mut out = Vec::new();
            for (id, group_bags) in bags.drain() {
                let start = id as f64 * *hop;
                out.extend(group_bags.into_values().map(|bag| {
                    let key = bag.key.clone();
                    let fields = bag.finalize_fields();
                    build_output(
                        spec,
                        &key,
                        Some(window_value(Value::from(id), Some(json_number(start)), Some(json_number(start + *size)), "hopping_by")),
                        fields,
                    )
                }));
            }
            out
        }
        WindowState::Sliding { size, index, buffer } => {
            if buffer.is_empty() || buffer.len() as u64 == *size {
                buffer.clear();
                return Vec::new();
            }
            let out = emit_sliding_snapshot(spec, buffer, *index - 1, buffer.len() as u64);
            buffer.clear();
            out
        }
        WindowState::SlidingBy { .. } => Vec::new(),
        WindowState::Session { sessions, .. } => sessions
            .drain()
            .map(|(_, (id, start, last, bag))| {
                let key = bag.key.clone();
                let fields = bag.finalize_fields();
                build_output(spec, &key, Some(window_value(Value::from(id), Some(json_number(start)), Some(json_number(last)), "session")), fields)
            })
            .collect(),
    }
}

fn process_emit(spec: &SummarizeSpec, state: &mut EmitState, record: Record) -> Vec<Record> {
    let key = group_key_value(spec, &record);
    let repr = group_repr(&key);
    state.bags.entry(repr.clone()).or_insert_with(|| GroupBag::new(spec, key.clone())).add(&record);
    state.record_count += 1;

    let first = !state.seen_first;
    state.seen_first = true;

    let policy = state.policy.clone();
    match policy {
        EmitPolicySpec::Every { amount, using } => {
            let triggered = if let Some(using_expr) = &using {
                let env = Env::new(&record);
                let value = numeric(&expr_value(using_expr, &env)).unwrap_or(0.0);
                let due = first || state.last_emit_value.map(|last| value - last >= amount).unwrap_or(true);
                if due {
                    state.last_emit_value = Some(value);
                }
                due
            } else {
                let due = first || state.record_count - state.last_emit_count >= amount as u64;
                if due {
                    state.last_emit_count = state.record_count;
                }
                due
            };
            if triggered {
                emit_all_groups(spec, &state.bags)
            } else {
                Vec::new()
            }
        }
        EmitPolicySpec::When(cond) => {
            let env = Env::new(&record);
            let triggered = eval(&cond, &env).map(|v| flowql_core::record::truthy(&v)).unwrap_or(false);
            if triggered {
                emit_one_group(spec, &state.bags, &repr)
            } else {
                Vec::new()
            }
        }
        EmitPolicySpec::OnChange(expr) => {
            let env = Env::new(&record);
            let value = expr_value(&expr, &env);
            let changed = first || state.prev_change_value.as_ref() != Some(&value);
            state.prev_change_value = Some(value);
            if changed {
                emit_one_group(spec, &state.bags, &repr)
            } else {
                Vec::new()
            }
        }
        EmitPolicySpec::OnGroupChange => {
            let changed = first || state.prev_group.as_deref() != Some(repr.as_str());
            state.prev_group = Some(repr.clone());
            if changed {
                emit_one_group(spec, &state.bags, &repr)
            } else {
                Vec::new()
            }
        }
        EmitPolicySpec::OnUpdate => emit_one_group(spec, &state.bags, &repr),
    }
}

fn emit_one_group(spec: &SummarizeSpec, bags: &HashMap<String, GroupBag>, repr: &str) -> Vec<Record> {
    match bags.get(repr) {
        Some(bag) => vec![build_output(spec, &bag.key, None, bag.finalize_fields())],
        None => Vec::new(),
    }
}

fn emit_all_groups(spec: &SummarizeSpec, bags: &HashMap<String, GroupBag>) -> Vec<Record> {
    bags.values().map(|bag| build_output(spec, &bag.key, None, bag.finalize_fields())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_total_count_by_product(window: Option<(String, WindowSpec)>) -> SummarizeSpec {
        SummarizeSpec {
            fields: vec![("total".into(), AggregatorSpec::Sum(Expr::Identifier("amount".into()))), ("count".into(), AggregatorSpec::Count)],
            group_key: Some(vec![Expr::Identifier("product".into())]),
            window,
            emit: None,
        }
    }

    #[tokio::test]
    async fn tumbling_by_count_closes_on_next_window_and_on_flush() {
        let spec = spec_total_count_by_product(Some(("w".into(), WindowSpec::Tumbling { size: 2 })));
        let mut summarize = Summarize::new(spec);
        let mut out = Vec::new();
        for (product, amount) in [("x", 1), ("x", 2), ("y", 3), ("y", 4)] {
            out.extend(summarize.process(json!({"product": product, "amount": amount})).await);
        }
        // x's window (records 0,1) closed when y's first record arrives (a new window id).
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["group_key"], json!("x"));
        assert_eq!(out[0]["total"], json!(3.0));
        assert_eq!(out[0]["count"], json!(2));

        let flushed = summarize.flush().await;
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0]["group_key"], json!("y"));
        assert_eq!(flushed[0]["total"], json!(7.0));
        assert_eq!(flushed[0]["count"], json!(2));
    }

    #[tokio::test]
    async fn emit_on_update_emits_every_record() {
        let spec = SummarizeSpec {
            fields: vec![("count".into(), AggregatorSpec::Count)],
            group_key: None,
            window: None,
            emit: Some(EmitPolicySpec::OnUpdate),
        };
        let mut summarize = Summarize::new(spec);
        let out1 = summarize.process(json!({})).await;
        let out2 = summarize.process(json!({})).await;
        assert_eq!(out1[0]["count"], json!(1));
        assert_eq!(out2[0]["count"], json!(2));
    }

    #[tokio::test]
    async fn emit_every_n_waits_for_the_count_to_advance() {
        let spec = SummarizeSpec {
            fields: vec![("count".into(), AggregatorSpec::Count)],
            group_key: None,
            window: None,
            emit: Some(EmitPolicySpec::Every { amount: 2.0, using: None }),
        };
        let mut summarize = Summarize::new(spec);
        let out1 = summarize.process(json!({})).await;
        let out2 = summarize.process(json!({})).await;
        let out3 = summarize.process(json!({})).await;
        assert!(!out1.is_empty(), "first record always emits");
        assert!(out2.is_empty());
        assert!(!out3.is_empty());
    }
}
