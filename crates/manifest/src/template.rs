//! Minimal renderer for the template directives manifests use.
//!
//! Supported: `{{ .Values.a.b }}`, `if` / `else if` / `else` / `end`, the functions
//! `eq ne and or not`, parenthesized sub-expressions, string/number/bool literals,
//! `{{-` / `-}}` whitespace trimming and `{{/* comments */}}`. A missing key renders
//! as `<no value>` and is falsy.

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};

const NO_VALUE: &str = "<no value>";

/// Viewer context a manifest is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Admin,
    User,
}

impl Viewer {
    pub fn values(self) -> Value {
        let username = match self { Viewer::Admin => "admin", Viewer::User => "user" };
        json!({ "Values": { "admin": "admin", "bfl": { "username": username } } })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Eq,
    Ne,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone)]
enum Expr {
    Dot,
    Field(Vec<String>),
    Lit(Value),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Output(Expr),
    If { branches: Vec<(Expr, Vec<Node>)>, otherwise: Vec<Node> },
}

#[derive(Debug)]
enum Piece {
    Text(String),
    Action(String),
}

#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(src: &str) -> Result<Self> {
        let pieces = lex(src)?;
        let mut it = pieces.into_iter();
        let (nodes, stop) = parse_block(&mut it)?;
        match stop {
            Stop::Eof => Ok(Self { nodes }),
            Stop::End => bail!("template: unexpected {{{{end}}}}"),
            Stop::Else | Stop::ElseIf(_) => bail!("template: unexpected {{{{else}}}}"),
        }
    }

    pub fn render(&self, ctx: &Value) -> Result<String> {
        let mut out = String::new();
        render_nodes(&self.nodes, ctx, &mut out)?;
        Ok(out)
    }
}

/// Parse and render in one step.
pub fn render(src: &str, viewer: Viewer) -> Result<String> { Template::parse(src)?.render(&viewer.values()) }

fn lex(src: &str) -> Result<Vec<Piece>> {
    let mut out = Vec::new();
    let mut rest = src;
    let mut trim_next = false;
    while let Some(start) = rest.find("{{") {
        let mut text = &rest[..start];
        if trim_next { text = text.trim_start(); }
        let mut after = &rest[start + 2..];
        if let Some(a) = after.strip_prefix('-') {
            if a.starts_with(|c: char| c.is_ascii_whitespace()) {
                text = text.trim_end();
                after = a;
            }
        }
        if !text.is_empty() { out.push(Piece::Text(text.to_string())); }
        let end = find_close(after).ok_or_else(|| anyhow!("template: unclosed action"))?;
        let mut body = &after[..end];
        trim_next = false;
        if let Some(b) = body.strip_suffix('-') {
            if b.ends_with(|c: char| c.is_ascii_whitespace()) {
                body = b;
                trim_next = true;
            }
        }
        out.push(Piece::Action(body.trim().to_string()));
        rest = &after[end + 2..];
    }
    let text = if trim_next { rest.trim_start() } else { rest };
    if !text.is_empty() { out.push(Piece::Text(text.to_string())); }
    Ok(out)
}

// Byte offset of the closing `}}`, skipping quoted strings and comments.
fn find_close(s: &str) -> Option<usize> {
    let b = s.as_bytes();
    let mut i = 0;
    if s.trim_start().starts_with("/*") {
        let c = s.find("*/")?;
        return s[c + 2..].find("}}").map(|p| p + c + 2);
    }
    while i + 1 < b.len() {
        match b[i] {
            b'"' => {
                i += 1;
                while i < b.len() && b[i] != b'"' {
                    if b[i] == b'\\' { i += 1; }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < b.len() && b[i] != b'`' { i += 1; }
            }
            b'}' if b[i + 1] == b'}' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

enum Stop {
    Eof,
    End,
    Else,
    ElseIf(Expr),
}

fn parse_block(it: &mut impl Iterator<Item = Piece>) -> Result<(Vec<Node>, Stop)> {
    let mut nodes = Vec::new();
    while let Some(piece) = it.next() {
        let action = match piece {
            Piece::Text(t) => {
                nodes.push(Node::Text(t));
                continue;
            }
            Piece::Action(a) => a,
        };
        if action.starts_with("/*") { continue; }
        if action == "end" { return Ok((nodes, Stop::End)); }
        if action == "else" { return Ok((nodes, Stop::Else)); }
        if let Some(cond) = action.strip_prefix("else if ") {
            return Ok((nodes, Stop::ElseIf(parse_expr(cond)?)));
        }
        if let Some(cond) = action.strip_prefix("if ") {
            nodes.push(parse_if(parse_expr(cond)?, it)?);
            continue;
        }
        let keyword = action.split_whitespace().next().unwrap_or("");
        if matches!(keyword, "range" | "with" | "define" | "template" | "block") {
            bail!("template: unsupported action {keyword:?}");
        }
        nodes.push(Node::Output(parse_expr(&action)?));
    }
    Ok((nodes, Stop::Eof))
}

fn parse_if(first: Expr, it: &mut impl Iterator<Item = Piece>) -> Result<Node> {
    let mut branches = Vec::new();
    let mut cond = first;
    loop {
        let (body, stop) = parse_block(it)?;
        branches.push((cond, body));
        match stop {
            Stop::End => return Ok(Node::If { branches, otherwise: Vec::new() }),
            Stop::ElseIf(next) => cond = next,
            Stop::Else => {
                let (otherwise, stop) = parse_block(it)?;
                return match stop {
                    Stop::End => Ok(Node::If { branches, otherwise }),
                    _ => bail!("template: expected {{{{end}}}} after {{{{else}}}}"),
                };
            }
            Stop::Eof => bail!("template: unterminated {{{{if}}}}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    LParen,
    RParen,
    Dot,
    Field(Vec<String>),
    Ident(String),
    Lit(Value),
}

fn tokenize(s: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '"' => {
                let mut lit = String::new();
                i += 1;
                loop {
                    let ch = *chars.get(i).ok_or_else(|| anyhow!("template: unterminated string"))?;
                    i += 1;
                    match ch {
                        '"' => break,
                        '\\' => {
                            let esc = *chars.get(i).ok_or_else(|| anyhow!("template: bad escape"))?;
                            i += 1;
                            lit.push(match esc { 'n' => '\n', 't' => '\t', other => other });
                        }
                        other => lit.push(other),
                    }
                }
                out.push(Tok::Lit(Value::String(lit)));
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..].iter().position(|&ch| ch == '`').ok_or_else(|| anyhow!("template: unterminated raw string"))?;
                out.push(Tok::Lit(Value::String(chars[start..start + end].iter().collect())));
                i = start + end + 1;
            }
            '.' => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '(' && chars[i] != ')' { i += 1; }
                let word: String = chars[start..i].iter().collect();
                if word == "." {
                    out.push(Tok::Dot);
                } else {
                    let path: Vec<String> = word[1..].split('.').map(str::to_string).collect();
                    if path.iter().any(|p| p.is_empty()) { bail!("template: bad field {word:?}"); }
                    out.push(Tok::Field(path));
                }
            }
            '|' => bail!("template: pipelines are not supported"),
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '(' && chars[i] != ')' { i += 1; }
                let word: String = chars[start..i].iter().collect();
                out.push(word_token(&word)?);
            }
        }
    }
    Ok(out)
}

fn word_token(word: &str) -> Result<Tok> {
    match word {
        "true" => return Ok(Tok::Lit(Value::Bool(true))),
        "false" => return Ok(Tok::Lit(Value::Bool(false))),
        "nil" => return Ok(Tok::Lit(Value::Null)),
        _ => {}
    }
    if let Ok(n) = word.parse::<i64>() { return Ok(Tok::Lit(json!(n))); }
    if let Ok(f) = word.parse::<f64>() { return Ok(Tok::Lit(json!(f))); }
    if word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') { return Ok(Tok::Ident(word.to_string())); }
    bail!("template: unexpected {word:?}")
}

fn parse_expr(src: &str) -> Result<Expr> {
    let toks = tokenize(src)?;
    let mut pos = 0;
    let expr = parse_command(&toks, &mut pos)?;
    if pos != toks.len() { bail!("template: trailing tokens in {src:?}"); }
    Ok(expr)
}

fn parse_command(toks: &[Tok], pos: &mut usize) -> Result<Expr> {
    if let Some(Tok::Ident(name)) = toks.get(*pos) {
        let func = match name.as_str() {
            "eq" => Func::Eq,
            "ne" => Func::Ne,
            "and" => Func::And,
            "or" => Func::Or,
            "not" => Func::Not,
            other => bail!("template: function {other:?} not defined"),
        };
        *pos += 1;
        let mut args = Vec::new();
        while *pos < toks.len() && toks[*pos] != Tok::RParen {
            args.push(parse_operand(toks, pos)?);
        }
        let arity_ok = match func {
            Func::Not => args.len() == 1,
            Func::Ne => args.len() == 2,
            Func::Eq | Func::And | Func::Or => args.len() >= 2,
        };
        if !arity_ok { bail!("template: wrong number of args for {name}"); }
        return Ok(Expr::Call(func, args));
    }
    parse_operand(toks, pos)
}

fn parse_operand(toks: &[Tok], pos: &mut usize) -> Result<Expr> {
    let tok = toks.get(*pos).ok_or_else(|| anyhow!("template: missing operand"))?;
    *pos += 1;
    match tok {
        Tok::Dot => Ok(Expr::Dot),
        Tok::Field(path) => Ok(Expr::Field(path.clone())),
        Tok::Lit(v) => Ok(Expr::Lit(v.clone())),
        Tok::LParen => {
            let inner = parse_command(toks, pos)?;
            if toks.get(*pos) != Some(&Tok::RParen) { bail!("template: unclosed parenthesis"); }
            *pos += 1;
            Ok(inner)
        }
        Tok::RParen => bail!("template: unexpected )"),
        Tok::Ident(name) => bail!("template: function {name:?} used as operand without parentheses"),
    }
}

fn render_nodes(nodes: &[Node], ctx: &Value, out: &mut String) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Output(e) => out.push_str(&display(&eval(e, ctx)?)),
            Node::If { branches, otherwise } => {
                let mut taken = false;
                for (cond, body) in branches {
                    if truthy(&eval(cond, ctx)?) {
                        render_nodes(body, ctx, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken { render_nodes(otherwise, ctx, out)?; }
            }
        }
    }
    Ok(())
}

fn eval(expr: &Expr, ctx: &Value) -> Result<Value> {
    Ok(match expr {
        Expr::Dot => ctx.clone(),
        Expr::Lit(v) => v.clone(),
        Expr::Field(path) => path.iter().try_fold(ctx, |cur, key| cur.get(key)).cloned().unwrap_or(Value::Null),
        Expr::Call(func, args) => {
            let vals = args.iter().map(|a| eval(a, ctx)).collect::<Result<Vec<_>>>()?;
            match func {
                Func::Eq => Value::Bool(vals[1..].iter().any(|v| same(&vals[0], v))),
                Func::Ne => Value::Bool(!same(&vals[0], &vals[1])),
                Func::Not => Value::Bool(!truthy(&vals[0])),
                // and/or yield the deciding operand, not a bool
                Func::And => vals.iter().find(|v| !truthy(v)).or(vals.last()).cloned().unwrap_or(Value::Null),
                Func::Or => vals.iter().find(|v| truthy(v)).or(vals.last()).cloned().unwrap_or(Value::Null),
            }
        }
    })
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::Null => NO_VALUE.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(src: &str) -> String { render(src, Viewer::Admin).unwrap() }
    fn user(src: &str) -> String { render(src, Viewer::User).unwrap() }

    #[test]
    fn substitutes_values() {
        assert_eq!(admin("name: {{ .Values.bfl.username }}"), "name: admin");
        assert_eq!(user("name: {{ .Values.bfl.username }}"), "name: user");
        assert_eq!(admin("x: {{ .Values.nope.deeper }}"), "x: <no value>");
    }

    #[test]
    fn if_else_chain() {
        let src = "mem: {{ if eq .Values.bfl.username .Values.admin }}2Gi{{ else if .Values.nope }}0{{ else }}1Gi{{ end }}";
        assert_eq!(admin(src), "mem: 2Gi");
        assert_eq!(user(src), "mem: 1Gi");
    }

    #[test]
    fn logic_functions_and_parens() {
        let src = r#"{{ if and (ne .Values.bfl.username "admin") (not .Values.missing) }}yes{{ else }}no{{ end }}"#;
        assert_eq!(user(src), "yes");
        assert_eq!(admin(src), "no");
        assert_eq!(admin(r#"{{ or .Values.missing "fallback" }}"#), "fallback");
        assert_eq!(admin("{{ eq 1 1.0 }}"), "true");
    }

    #[test]
    fn trim_markers_and_comments() {
        let src = "a:\n  {{- /* note */ -}}\n  b\n{{- if true }}\nc{{ end -}}\n";
        assert_eq!(admin(src), "a:b\nc");
    }

    #[test]
    fn malformed_templates_fail() {
        assert!(Template::parse("{{ if .Values.admin }}x").is_err());
        assert!(Template::parse("{{ end }}").is_err());
        assert!(Template::parse("{{ range .Values }}{{ end }}").is_err());
        assert!(Template::parse("{{ .Values.admin | quote }}").is_err());
        assert!(Template::parse("{{ .Values.admin").is_err());
    }
}
