//! Username templates
//!
//! Generated usernames come from a small template language:
//!
//! ```text
//! {{ printf "v-%s-%s-%s-%s" (.DisplayName | truncate 10) (.RoleName | truncate 10) (random 20) (unix_time) | truncate 32 }}
//! ```
//!
//! Text outside `{{ }}` is copied. Inside an action, commands are chained
//! with `|`; the value on the left becomes the last argument of the function
//! on the right. Arguments are `.DisplayName` / `.RoleName`, string or
//! integer literals, parenthesised pipelines, or functions called without
//! arguments. `{{-` and `-}}` trim adjacent whitespace.
//!
//! Functions: `printf`, `truncate`, `truncate_sha256`, `uppercase`,
//! `lowercase`, `replace`, `random`, `uuid`, `timestamp`, `unix_time`,
//! `unix_time_millis`, `sha256`, `base64`.
//!
//! `timestamp` takes a reference-time layout (`"2006-01-02T15:04:05Z07:00"`)
//! and formats the current UTC time with it.

use crate::{Error, Result};
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;

/// Template used when the configuration does not provide one
pub const DEFAULT_USERNAME_TEMPLATE: &str = r#"{{ printf "v-%s-%s-%s-%s" (.DisplayName | truncate 10) (.RoleName | truncate 10) (random 20) (unix_time) | truncate 32 }}"#;

/// Values a template can reference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateData {
    /// `.DisplayName`
    pub display_name: String,
    /// `.RoleName`
    pub role_name: String,
}

impl TemplateData {
    fn field(&self, name: &str) -> Result<Value> {
        match name {
            "DisplayName" => Ok(Value::Str(self.display_name.clone())),
            "RoleName" => Ok(Value::Str(self.role_name.clone())),
            other => Err(template_error(format!("unknown field .{}", other))),
        }
    }
}

/// A parsed username template
#[derive(Debug, Clone)]
pub struct UsernameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl UsernameTemplate {
    /// Parse a template
    pub fn parse(source: &str) -> Result<Self> {
        let segments = parse_segments(source)?;
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Template text as given
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render with `data`
    pub fn render(&self, data: &TemplateData) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Action(pipeline) => out.push_str(&eval_pipeline(pipeline, data)?.to_string()),
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
}

impl Value {
    fn as_int(&self, func: &str) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Str(s) => s.parse().map_err(|_| {
                template_error(format!("{}: expected an integer, got {:?}", func, s))
            }),
        }
    }

    fn into_string(self) -> String {
        match self {
            Value::Str(s) => s,
            Value::Int(n) => n.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone)]
struct Command {
    args: Vec<Arg>,
}

#[derive(Debug, Clone)]
enum Arg {
    Field(String),
    Literal(Value),
    Function(String),
    Nested(Pipeline),
}

fn template_error(msg: impl Into<String>) -> Error {
    Error::UsernameTemplate(msg.into())
}

fn parse_segments(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut trim_next_text = false;

    while let Some(start) = rest.find("{{") {
        let mut text = &rest[..start];
        if trim_next_text {
            text = text.trim_start();
        }
        let mut body = &rest[start + 2..];
        if let Some(stripped) = body.strip_prefix('-') {
            text = text.trim_end();
            body = stripped;
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }

        let end = find_action_end(body)
            .ok_or_else(|| template_error("unclosed action: missing }}"))?;
        let mut inner = &body[..end];
        trim_next_text = false;
        if let Some(stripped) = inner.strip_suffix('-') {
            inner = stripped;
            trim_next_text = true;
        }

        let tokens = tokenize(inner)?;
        let mut parser = Parser { tokens, pos: 0 };
        let pipeline = parser.pipeline()?;
        if parser.pos != parser.tokens.len() {
            return Err(template_error("unexpected ) in action"));
        }
        segments.push(Segment::Action(pipeline));
        rest = &body[end + 2..];
    }

    let text = if trim_next_text { rest.trim_start() } else { rest };
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
    Ok(segments)
}

/// Byte offset of the closing `}}`, skipping string literals
fn find_action_end(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Str(String),
    Int(i64),
    Ident(String),
    Pipe,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err(template_error("unterminated string")),
                        },
                        Some(other) => s.push(other),
                        None => return Err(template_error("unterminated string")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '`' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('`') => break,
                        Some(other) => s.push(other),
                        None => return Err(template_error("unterminated raw string")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '.' => {
                chars.next();
                let name = take_word(&mut chars);
                if name.is_empty() {
                    return Err(template_error("expected a field name after ."));
                }
                tokens.push(Token::Field(name));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut s = String::new();
                s.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = s
                    .parse()
                    .map_err(|_| template_error(format!("invalid number {:?}", s)))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                tokens.push(Token::Ident(take_word(&mut chars)));
            }
            other => {
                return Err(template_error(format!(
                    "unexpected character {:?} in action",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

fn take_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn pipeline(&mut self) -> Result<Pipeline> {
        let mut commands = vec![self.command()?];
        while self.tokens.get(self.pos) == Some(&Token::Pipe) {
            self.pos += 1;
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> Result<Command> {
        let mut args = Vec::new();
        while let Some(token) = self.tokens.get(self.pos).cloned() {
            let arg = match token {
                Token::Pipe | Token::RParen => break,
                Token::Field(name) => Arg::Field(name),
                Token::Str(s) => Arg::Literal(Value::Str(s)),
                Token::Int(n) => Arg::Literal(Value::Int(n)),
                Token::Ident(name) => Arg::Function(name),
                Token::LParen => {
                    self.pos += 1;
                    let nested = self.pipeline()?;
                    if self.tokens.get(self.pos) != Some(&Token::RParen) {
                        return Err(template_error("unclosed ( in action"));
                    }
                    Arg::Nested(nested)
                }
            };
            self.pos += 1;
            args.push(arg);
        }
        if args.is_empty() {
            return Err(template_error("empty command in action"));
        }
        Ok(Command { args })
    }
}

fn eval_pipeline(pipeline: &Pipeline, data: &TemplateData) -> Result<Value> {
    let mut piped: Option<Value> = None;
    for command in &pipeline.commands {
        piped = Some(eval_command(command, data, piped.take())?);
    }
    piped.ok_or_else(|| template_error("empty pipeline"))
}

fn eval_command(command: &Command, data: &TemplateData, piped: Option<Value>) -> Result<Value> {
    match &command.args[0] {
        Arg::Function(name) => {
            let mut args = command.args[1..]
                .iter()
                .map(|arg| eval_arg(arg, data))
                .collect::<Result<Vec<_>>>()?;
            args.extend(piped);
            call(name, args)
        }
        first => {
            if command.args.len() > 1 || piped.is_some() {
                return Err(template_error("can't give arguments to a non-function"));
            }
            eval_arg(first, data)
        }
    }
}

fn eval_arg(arg: &Arg, data: &TemplateData) -> Result<Value> {
    match arg {
        Arg::Field(name) => data.field(name),
        Arg::Literal(value) => Ok(value.clone()),
        Arg::Function(name) => call(name, Vec::new()),
        Arg::Nested(pipeline) => eval_pipeline(pipeline, data),
    }
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<()> {
    if args.len() != count {
        return Err(template_error(format!(
            "wrong number of args for {}: want {} got {}",
            name,
            count,
            args.len()
        )));
    }
    Ok(())
}

fn call(name: &str, args: Vec<Value>) -> Result<Value> {
    match name {
        "printf" => printf(args),
        "truncate" => {
            expect_args(name, &args, 2)?;
            let max = args[0].as_int(name)?;
            if max <= 0 {
                return Err(template_error(format!(
                    "max length must be > 0 but was {}",
                    max
                )));
            }
            let s = args[1].to_string();
            Ok(Value::Str(s.chars().take(max as usize).collect()))
        }
        "truncate_sha256" => {
            expect_args(name, &args, 2)?;
            let max = args[0].as_int(name)?;
            if max <= 8 {
                return Err(template_error(format!(
                    "max length must be > 8 but was {}",
                    max
                )));
            }
            let s = args[1].to_string();
            let max = max as usize;
            if s.chars().count() <= max {
                return Ok(Value::Str(s));
            }
            let keep: String = s.chars().take(max - 8).collect();
            let tail: String = s.chars().skip(max - 8).collect();
            let digest = sha256_hex(&tail);
            Ok(Value::Str(format!("{}{}", keep, &digest[..8])))
        }
        "uppercase" => {
            expect_args(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_uppercase()))
        }
        "lowercase" => {
            expect_args(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_lowercase()))
        }
        "replace" => {
            expect_args(name, &args, 3)?;
            let find = args[0].to_string();
            let with = args[1].to_string();
            Ok(Value::Str(args[2].to_string().replace(&find, &with)))
        }
        "random" => {
            expect_args(name, &args, 1)?;
            let len = args[0].as_int(name)?;
            if len <= 0 {
                return Err(template_error(format!(
                    "random length must be > 0 but was {}",
                    len
                )));
            }
            let s: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(len as usize)
                .map(char::from)
                .collect();
            Ok(Value::Str(s))
        }
        "uuid" => {
            expect_args(name, &args, 0)?;
            Ok(Value::Str(uuid::Uuid::new_v4().to_string()))
        }
        "timestamp" => {
            expect_args(name, &args, 1)?;
            let layout = args[0].to_string();
            Ok(Value::Str(format_timestamp(chrono::Utc::now(), &layout)))
        }
        "unix_time" => {
            expect_args(name, &args, 0)?;
            Ok(Value::Int(chrono::Utc::now().timestamp()))
        }
        "unix_time_millis" => {
            expect_args(name, &args, 0)?;
            Ok(Value::Int(chrono::Utc::now().timestamp_millis()))
        }
        "sha256" => {
            expect_args(name, &args, 1)?;
            Ok(Value::Str(sha256_hex(&args[0].to_string())))
        }
        "base64" => {
            expect_args(name, &args, 1)?;
            Ok(Value::Str(
                base64::engine::general_purpose::STANDARD.encode(args[0].to_string()),
            ))
        }
        other => Err(template_error(format!("function {:?} not defined", other))),
    }
}

/// Reference-time layout tokens and their strftime equivalents, longest first
const LAYOUT_TOKENS: &[(&str, &str)] = &[
    (".000000000", "%.9f"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    ("January", "%B"),
    ("Monday", "%A"),
    ("Z07:00", "Z"),
    ("-07:00", "%:z"),
    ("Z0700", "Z"),
    ("-0700", "%z"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "UTC"),
    ("01", "%m"),
    ("02", "%d"),
    ("_2", "%e"),
    ("06", "%y"),
    ("15", "%H"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("PM", "%p"),
    ("pm", "%P"),
    ("1", "%-m"),
    ("2", "%-d"),
    ("3", "%-I"),
    ("4", "%-M"),
    ("5", "%-S"),
];

fn format_timestamp(now: chrono::DateTime<chrono::Utc>, layout: &str) -> String {
    let mut strftime = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'scan: while let Some(c) = rest.chars().next() {
        for (token, spec) in LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                strftime.push_str(spec);
                rest = tail;
                continue 'scan;
            }
        }
        if c == '%' {
            strftime.push_str("%%");
        } else {
            strftime.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    now.format(&strftime).to_string()
}

fn printf(args: Vec<Value>) -> Result<Value> {
    let mut args = args.into_iter();
    let format = args
        .next()
        .ok_or_else(|| template_error("printf needs a format string"))?
        .into_string();

    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('s' | 'd' | 'v')) => match args.next() {
                Some(value) => {
                    if verb == 'd' {
                        out.push_str(&value.as_int("printf")?.to_string());
                    } else {
                        out.push_str(&value.to_string());
                    }
                }
                None => out.push_str(&format!("%!{}(MISSING)", verb)),
            },
            Some(other) => {
                return Err(template_error(format!("printf: unsupported verb %{}", other)))
            }
            None => out.push_str("%!(NOVERB)"),
        }
    }
    Ok(Value::Str(out))
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(display: &str, role: &str) -> TemplateData {
        TemplateData {
            display_name: display.into(),
            role_name: role.into(),
        }
    }

    fn is_alnum(s: &str) -> bool {
        s.chars().all(|c| c.is_ascii_alphanumeric())
    }

    #[test]
    fn test_default_template() {
        let template = UsernameTemplate::parse(DEFAULT_USERNAME_TEMPLATE).unwrap();
        let username = template.render(&data("token", "testrole")).unwrap();

        assert_eq!(username.len(), 32);
        let suffix = username.strip_prefix("v-token-testrole-").unwrap();
        assert_eq!(suffix.len(), 15);
        assert!(is_alnum(suffix));
    }

    #[test]
    fn test_default_template_truncates_long_names() {
        let template = UsernameTemplate::parse(DEFAULT_USERNAME_TEMPLATE).unwrap();
        let username = template
            .render(&data("averyveryverylongdisplayname", "anotherlongrolename"))
            .unwrap();
        assert!(username.starts_with("v-averyveryv-anotherlon-"));
        assert_eq!(username.len(), 32);
    }

    #[test]
    fn test_default_template_with_empty_metadata() {
        let template = UsernameTemplate::parse(DEFAULT_USERNAME_TEMPLATE).unwrap();
        let username = template.render(&TemplateData::default()).unwrap();
        assert!(username.starts_with("v---"));
    }

    #[test]
    fn test_custom_template() {
        let template =
            UsernameTemplate::parse("foo-{{random 10}}-{{.RoleName | uppercase}}").unwrap();
        let username = template.render(&data("token", "testrole")).unwrap();

        let middle = username
            .strip_prefix("foo-")
            .and_then(|s| s.strip_suffix("-TESTROLE"))
            .unwrap();
        assert_eq!(middle.len(), 10);
        assert!(is_alnum(middle));
    }

    #[test]
    fn test_functions() {
        let render = |src: &str| {
            UsernameTemplate::parse(src)
                .unwrap()
                .render(&data("Alice.Smith", "Admin"))
                .unwrap()
        };

        assert_eq!(render("{{.DisplayName | lowercase}}"), "alice.smith");
        assert_eq!(render(r#"{{.DisplayName | replace "." "_"}}"#), "Alice_Smith");
        assert_eq!(render("{{.RoleName | sha256}}").len(), 64);
        assert_eq!(render("{{.RoleName | base64}}"), "QWRtaW4=");
        assert_eq!(render(r#"{{printf "%s-%d-%%" .RoleName 7}}"#), "Admin-7-%");
        assert_eq!(render("{{.DisplayName | truncate_sha256 20}}"), "Alice.Smith");
        assert_eq!(render("{{.DisplayName | truncate_sha256 9}}").len(), 9);
        assert!(render("{{unix_time_millis}}").parse::<i64>().is_ok());

        let id = render("{{ uuid }}");
        assert!(uuid::Uuid::parse_str(&id).is_ok(), "{}", id);
        assert_ne!(id, render("{{ uuid }}"));

        let year = render(r#"{{ timestamp "2006" }}"#);
        assert_eq!(year, chrono::Utc::now().format("%Y").to_string());
    }

    #[test]
    fn test_timestamp_layouts() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-03-04T05:06:07.089Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        assert_eq!(format_timestamp(at, "2006-01-02T15:04:05Z07:00"), "2026-03-04T05:06:07Z");
        assert_eq!(format_timestamp(at, "20060102150405"), "20260304050607");
        assert_eq!(format_timestamp(at, "Jan 2 3:04PM"), "Mar 4 5:06AM");
        assert_eq!(format_timestamp(at, "15:04:05.000 -0700"), "05:06:07.089 +0000");
        assert_eq!(format_timestamp(at, "v-%-2006"), "v-%-2026");
    }

    #[test]
    fn test_trim_markers() {
        let template = UsernameTemplate::parse("a  {{- .RoleName -}}  b").unwrap();
        assert_eq!(template.render(&data("", "r")).unwrap(), "arb");
    }

    #[test]
    fn test_parse_errors() {
        assert!(UsernameTemplate::parse("{{ .RoleName").is_err());
        assert!(UsernameTemplate::parse("{{ (.RoleName }}").is_err());
        assert!(UsernameTemplate::parse("{{ }}").is_err());
        assert!(UsernameTemplate::parse(r#"{{ "open }}"#).is_err());
    }

    #[test]
    fn test_render_errors() {
        let unknown_field = UsernameTemplate::parse("{{.Nope}}").unwrap();
        assert!(matches!(
            unknown_field.render(&TemplateData::default()),
            Err(Error::UsernameTemplate(_))
        ));

        let unknown_fn = UsernameTemplate::parse("{{ nope .RoleName }}").unwrap();
        assert!(unknown_fn.render(&TemplateData::default()).is_err());

        let bad_len = UsernameTemplate::parse("{{ .RoleName | truncate 0 }}").unwrap();
        assert!(bad_len.render(&TemplateData::default()).is_err());
    }

    #[test]
    fn test_plain_text_passthrough() {
        let template = UsernameTemplate::parse("static-user").unwrap();
        assert_eq!(template.render(&TemplateData::default()).unwrap(), "static-user");
        assert_eq!(template.source(), "static-user");
    }
}
