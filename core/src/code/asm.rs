//! Text assembler for code units.
//!
//! ```text
//! def add(a, b=1):
//!     LOAD_FAST a
//!     LOAD_FAST b
//!     BINARY_ADD
//!     RETURN_VALUE
//!
//! body main:
//!     LOAD_GLOBAL add
//!     LOAD_CONST 2
//!     CALL_FUNCTION 1
//!     STORE_NAME result
//!     LOAD_CONST None
//!     RETURN_VALUE
//! ```
//!
//! `def` headers produce optimized function code; `body` headers produce
//! module-level code that resolves names through the `*_NAME` opcodes.
//! Operands are symbolic: literals for constants, identifiers for names and
//! locals, labels for jumps, operator symbols for `COMPARE_OP`, `@unit` for a
//! nested code constant and `pos, kw` for call counts.

use std::rc::Rc;

use anyhow::{Context, Result, anyhow, bail};

use super::opcode::{ArgKind, Opcode};
use super::{CO_VARARGS, CO_VARKEYWORDS, CodeBuilder, CodeUnit};
use crate::op::CompareOp;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Function code bound as a global when the program is loaded.
    Def,
    /// Module-level code run once when the program is loaded.
    Body,
}

#[derive(Debug)]
pub struct Unit {
    pub kind: UnitKind,
    pub code: Rc<CodeUnit>,
    /// Header defaults, for `def` units bound at load time.
    pub defaults: Vec<Value>,
}

/// All units of one source file, in source order.
#[derive(Debug, Default)]
pub struct Program {
    pub units: Vec<Unit>,
}

impl Program {
    pub fn get(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.code.name == name)
    }

    pub fn defs(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.kind == UnitKind::Def)
    }

    pub fn bodies(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.kind == UnitKind::Body)
    }

    /// Every code unit, including ones only reachable as nested constants.
    pub fn all_code(&self) -> Vec<Rc<CodeUnit>> {
        fn walk(code: &Rc<CodeUnit>, out: &mut Vec<Rc<CodeUnit>>) {
            if out.iter().any(|c| Rc::ptr_eq(c, code)) {
                return;
            }
            out.push(code.clone());
            for nested in code.nested() {
                walk(nested, out);
            }
        }
        let mut out = Vec::new();
        for unit in &self.units {
            walk(&unit.code, &mut out);
        }
        out
    }
}

#[derive(Debug, Clone)]
enum Operand {
    None,
    Literal(String),
}

#[derive(Debug, Clone)]
struct Line {
    number: usize,
    op: Opcode,
    operand: Operand,
}

#[derive(Debug)]
struct Source {
    kind: UnitKind,
    name: String,
    line: usize,
    params: Vec<String>,
    varargs: Option<String>,
    varkw: Option<String>,
    defaults: Vec<String>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    instrs: Vec<Line>,
    /// Label name to the index of the instruction it precedes.
    labels: FastHashMap<String, usize>,
}

/// Assembles a whole source file.
pub fn assemble(src: &str) -> Result<Program> {
    let sources = parse_units(src)?;
    let mut built: FastHashMap<String, Rc<CodeUnit>> = fast_hash_map_new();
    let mut units = Vec::new();
    for source in &sources {
        let code = build_unit(source, &sources, &mut built, &mut Vec::new())?;
        let defaults = source
            .defaults
            .iter()
            .map(|text| parse_literal(text))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("defaults of '{}'", source.name))?;
        units.push(Unit {
            kind: source.kind,
            code,
            defaults,
        });
    }
    Ok(Program { units })
}

fn strip_comment(line: &str) -> &str {
    let mut in_quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in line.char_indices() {
        match in_quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    in_quote = None;
                }
            }
            None if ch == '\'' || ch == '"' => in_quote = Some(ch),
            None if ch == '#' || ch == ';' => return &line[..i],
            None => {}
        }
    }
    line
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_units(src: &str) -> Result<Vec<Source>> {
    let mut units: Vec<Source> = Vec::new();
    for (idx, raw) in src.lines().enumerate() {
        let number = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("def ") {
            units.push(parse_def_header(rest, number)?);
            continue;
        }
        if let Some(rest) = line.strip_prefix("body ") {
            let name = rest
                .strip_suffix(':')
                .map(str::trim)
                .filter(|n| is_ident(n))
                .ok_or_else(|| anyhow!("line {number}: expected 'body NAME:'"))?;
            units.push(Source {
                kind: UnitKind::Body,
                name: name.to_string(),
                line: number,
                params: Vec::new(),
                varargs: None,
                varkw: None,
                defaults: Vec::new(),
                cellvars: Vec::new(),
                freevars: Vec::new(),
                instrs: Vec::new(),
                labels: fast_hash_map_new(),
            });
            continue;
        }
        let Some(unit) = units.last_mut() else {
            bail!("line {number}: instruction outside of a unit");
        };
        if let Some(rest) = line.strip_prefix(".cellvars") {
            unit.cellvars.extend(split_names(rest));
            continue;
        }
        if let Some(rest) = line.strip_prefix(".freevars") {
            unit.freevars.extend(split_names(rest));
            continue;
        }
        if let Some(label) = line.strip_suffix(':')
            && is_ident(label)
        {
            if unit.labels.insert(label.to_string(), unit.instrs.len()).is_some() {
                bail!("line {number}: duplicate label '{label}'");
            }
            continue;
        }
        let (mnemonic, operand) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, Operand::Literal(rest.trim().to_string())),
            None => (line, Operand::None),
        };
        let op = Opcode::from_name(mnemonic).ok_or_else(|| anyhow!("line {number}: unknown opcode '{mnemonic}'"))?;
        if op == Opcode::ExtendedArg {
            bail!("line {number}: EXTENDED_ARG is emitted automatically");
        }
        match (op.has_arg(), &operand) {
            (true, Operand::None) => bail!("line {number}: {mnemonic} needs an operand"),
            (false, Operand::Literal(_)) => bail!("line {number}: {mnemonic} takes no operand"),
            _ => {}
        }
        unit.instrs.push(Line { number, op, operand });
    }
    let mut seen = fast_hash_map_new();
    for unit in &units {
        if let Some(prev) = seen.insert(unit.name.clone(), unit.line) {
            bail!("line {}: unit '{}' already defined on line {prev}", unit.line, unit.name);
        }
    }
    Ok(units)
}

fn split_names(rest: &str) -> impl Iterator<Item = String> + '_ {
    rest.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_def_header(rest: &str, number: usize) -> Result<Source> {
    let rest = rest
        .trim()
        .strip_suffix(':')
        .ok_or_else(|| anyhow!("line {number}: def header must end with ':'"))?;
    let (name, params) = rest
        .split_once('(')
        .and_then(|(n, p)| Some((n.trim(), p.strip_suffix(')')?)))
        .ok_or_else(|| anyhow!("line {number}: expected 'def NAME(PARAMS):'"))?;
    if !is_ident(name) {
        bail!("line {number}: bad function name '{name}'");
    }
    let mut source = Source {
        kind: UnitKind::Def,
        name: name.to_string(),
        line: number,
        params: Vec::new(),
        varargs: None,
        varkw: None,
        defaults: Vec::new(),
        cellvars: Vec::new(),
        freevars: Vec::new(),
        instrs: Vec::new(),
        labels: fast_hash_map_new(),
    };
    for param in split_top_level(params) {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        if let Some(kw) = param.strip_prefix("**") {
            source.varkw = Some(kw.trim().to_string());
        } else if let Some(var) = param.strip_prefix('*') {
            if source.varkw.is_some() {
                bail!("line {number}: *{var} after **");
            }
            source.varargs = Some(var.trim().to_string());
        } else if let Some((p, default)) = param.split_once('=') {
            if source.varargs.is_some() || source.varkw.is_some() {
                bail!("line {number}: parameter '{p}' after * or **");
            }
            source.params.push(p.trim().to_string());
            source.defaults.push(default.trim().to_string());
        } else {
            if !source.defaults.is_empty() {
                bail!("line {number}: non-default parameter '{param}' follows default parameter");
            }
            if source.varargs.is_some() || source.varkw.is_some() {
                bail!("line {number}: parameter '{param}' after * or **");
            }
            source.params.push(param.to_string());
        }
    }
    for name in source.params.iter().chain(&source.varargs).chain(&source.varkw) {
        if !is_ident(name) {
            bail!("line {number}: bad parameter name '{name}'");
        }
    }
    Ok(source)
}

/// Splits on commas that are not nested in brackets or quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn build_unit(
    source: &Source,
    all: &[Source],
    built: &mut FastHashMap<String, Rc<CodeUnit>>,
    in_progress: &mut Vec<String>,
) -> Result<Rc<CodeUnit>> {
    if let Some(code) = built.get(&source.name) {
        return Ok(code.clone());
    }
    if in_progress.contains(&source.name) {
        bail!("unit '{}' contains itself as a constant", source.name);
    }
    in_progress.push(source.name.clone());

    let mut builder = CodeBuilder::new(source.name.clone());
    if source.kind == UnitKind::Body {
        builder.flags = 0;
    }
    builder.argcount = source.params.len();
    for param in &source.params {
        builder.add_local(param);
    }
    if let Some(var) = &source.varargs {
        builder.add_local(var);
        builder.flags |= CO_VARARGS;
    }
    if let Some(kw) = &source.varkw {
        builder.add_local(kw);
        builder.flags |= CO_VARKEYWORDS;
    }
    builder.cellvars = source.cellvars.clone();
    builder.freevars = source.freevars.clone();

    // Operands first, so jump layout only has to deal with labels.
    enum Arg {
        None,
        Value(u32),
        Label(usize),
    }
    let mut args = Vec::with_capacity(source.instrs.len());
    for line in &source.instrs {
        let Operand::Literal(text) = &line.operand else {
            args.push(Arg::None);
            continue;
        };
        let number = line.number;
        let arg = match line.op.arg_kind() {
            ArgKind::Const => {
                let value = match text.strip_prefix('@') {
                    Some(unit) => {
                        let nested = all
                            .iter()
                            .find(|s| s.name == unit)
                            .ok_or_else(|| anyhow!("line {number}: unknown unit '@{unit}'"))?;
                        Value::code(build_unit(nested, all, built, in_progress)?)
                    }
                    None => parse_literal(text).with_context(|| format!("line {number}"))?,
                };
                Arg::Value(builder.add_const(value))
            }
            ArgKind::Name => {
                if !is_ident(text) {
                    bail!("line {number}: bad name '{text}'");
                }
                Arg::Value(builder.add_name(text))
            }
            ArgKind::Local => {
                if !is_ident(text) {
                    bail!("line {number}: bad local '{text}'");
                }
                Arg::Value(builder.add_local(text))
            }
            ArgKind::Free => {
                let idx = builder
                    .cellvars
                    .iter()
                    .chain(&builder.freevars)
                    .position(|n| n == text)
                    .ok_or_else(|| anyhow!("line {number}: '{text}' is not a cell or free variable"))?;
                Arg::Value(idx as u32)
            }
            ArgKind::Compare => {
                let op = match text.parse::<u32>() {
                    Ok(n) => CompareOp::from_arg(n),
                    Err(_) => CompareOp::from_symbol(text),
                };
                Arg::Value(op.ok_or_else(|| anyhow!("line {number}: bad comparison '{text}'"))?.as_arg())
            }
            ArgKind::JRel | ArgKind::JAbs => {
                let target = source
                    .labels
                    .get(text.as_str())
                    .copied()
                    .ok_or_else(|| anyhow!("line {number}: unknown label '{text}'"))?;
                Arg::Label(target)
            }
            ArgKind::Count => Arg::Value(parse_count(text).with_context(|| format!("line {number}"))?),
            ArgKind::None => Arg::None,
        };
        args.push(arg);
    }

    // Lay out until every jump argument fits the size assumed for it.
    let mut wide = vec![false; source.instrs.len()];
    let (offsets, end) = loop {
        let mut offsets = Vec::with_capacity(source.instrs.len());
        let mut pc = 0usize;
        for (i, line) in source.instrs.iter().enumerate() {
            offsets.push(pc);
            pc += match (line.op.has_arg(), wide[i]) {
                (false, _) => 1,
                (true, false) => 3,
                (true, true) => 6,
            };
        }
        let offset_of = |idx: usize| offsets.get(idx).copied().unwrap_or(pc);
        let mut changed = false;
        for (i, line) in source.instrs.iter().enumerate() {
            let Arg::Label(target) = args[i] else { continue };
            let next = offset_of(i + 1);
            let value = jump_arg(line, offset_of(target), next)?;
            if value > 0xffff && !wide[i] {
                wide[i] = true;
                changed = true;
            }
        }
        if !changed {
            break (offsets, pc);
        }
    };
    let offset_of = |idx: usize| offsets.get(idx).copied().unwrap_or(end);

    for (i, line) in source.instrs.iter().enumerate() {
        let arg = match args[i] {
            Arg::None => 0,
            Arg::Value(v) => v,
            Arg::Label(target) => jump_arg(line, offset_of(target), offset_of(i + 1))?,
        };
        builder.emit(line.op, arg);
    }

    let code = builder.build();
    in_progress.pop();
    built.insert(source.name.clone(), code.clone());
    Ok(code)
}

fn jump_arg(line: &Line, target: usize, next: usize) -> Result<u32> {
    if line.op.arg_kind() == ArgKind::JAbs {
        return Ok(target as u32);
    }
    if target < next {
        bail!("line {}: {} can only jump forward", line.number, line.op);
    }
    Ok((target - next) as u32)
}

fn parse_count(text: &str) -> Result<u32> {
    match text.split_once(',') {
        Some((pos, kw)) => {
            let pos: u32 = pos.trim().parse().map_err(|_| anyhow!("bad count '{text}'"))?;
            let kw: u32 = kw.trim().parse().map_err(|_| anyhow!("bad count '{text}'"))?;
            if pos > 0xff || kw > 0xff {
                bail!("count '{text}' out of range");
            }
            Ok(pos | (kw << 8))
        }
        None => text.trim().parse().map_err(|_| anyhow!("bad count '{text}'")),
    }
}

/// Parses a constant literal: `None`, `True`, `False`, integers, floats,
/// imaginary numbers (`2j`), quoted strings and tuples of those.
pub fn parse_literal(text: &str) -> Result<Value> {
    let text = text.trim();
    match text {
        "None" => return Ok(Value::none()),
        "True" => return Ok(Value::bool(true)),
        "False" => return Ok(Value::bool(false)),
        _ => {}
    }
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        let parts = split_top_level(inner);
        let trailing_comma = parts.len() > 1 && parts.last().is_some_and(|p| p.trim().is_empty());
        let items = parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .map(parse_literal)
            .collect::<Result<Vec<_>>>()?;
        if items.len() == 1 && !trailing_comma {
            bail!("parenthesised literal '{text}' is not a tuple; add a trailing comma");
        }
        return Ok(Value::tuple(items));
    }
    if let Some(quote) = text.chars().next().filter(|c| *c == '\'' || *c == '"') {
        let inner = text
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
            .filter(|_| text.len() >= 2)
            .ok_or_else(|| anyhow!("unterminated string {text}"))?;
        return Ok(Value::str(unescape(inner)?));
    }
    if let Some(imag) = text.strip_suffix(['j', 'J']) {
        let im: f64 = imag.parse().map_err(|_| anyhow!("bad imaginary literal '{text}'"))?;
        return Ok(Value::complex(0.0, im));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::int(i));
    }
    if text.contains(['.', 'e', 'E']) || matches!(text, "inf" | "-inf" | "nan") {
        let f: f64 = text.parse().map_err(|_| anyhow!("bad float literal '{text}'"))?;
        return Ok(Value::float(f));
    }
    bail!("bad literal '{text}'")
}

fn unescape(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => bail!("unknown escape '\\{other}'"),
            None => bail!("dangling backslash"),
        }
    }
    Ok(out)
}
