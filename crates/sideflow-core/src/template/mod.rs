//! Template expansion over raw script text.
//!
//! The whole document is treated as a template before JSON parsing.
//! Placeholders use `{{ expr }}` syntax and are rendered in a single forward
//! pass, so substituted values are never re-scanned for placeholders.
//!
//! Expression vocabulary:
//! - `param.NAME` — request parameter lookup
//! - `today(fmt?)` — current local time, strftime format
//! - `randomInt(min, max)` — uniform integer, inclusive bounds
//! - `randomString(n)` — `n` alphanumeric characters
//! - `faker.name()` / `faker.email()` / `faker.phone()` — Korean-locale
//!   pseudo-identity, generator seeded per call
//! - `jsFile("name.js")` — file from the configured JS directory, rendered
//!   recursively and JSON-string-escaped

mod faker;

pub use faker::Faker;

use crate::error::{CoreError, Result};
use chrono::Local;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

const DEFAULT_TODAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const MAX_INCLUDE_DEPTH: usize = 8;

/// Stateless engine configured with the JS helper directory and an optional
/// RNG seed. Stochastic helpers draw from entropy unless a seed is pinned.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    js_dir: PathBuf,
    seed: Option<u64>,
}

impl TemplateEngine {
    pub fn new(js_dir: impl Into<PathBuf>) -> Self {
        Self {
            js_dir: js_dir.into(),
            seed: None,
        }
    }

    /// Pin the RNG seed so stochastic helpers become deterministic.
    pub fn with_seed(js_dir: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            js_dir: js_dir.into(),
            seed: Some(seed),
        }
    }

    /// Expand every placeholder in `source` against `params`.
    pub fn render(&self, source: &str, params: &HashMap<String, String>) -> Result<String> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut renderer = Renderer {
            js_dir: &self.js_dir,
            params,
            rng: &mut rng,
        };
        renderer.render(source, 0)
    }
}

struct Renderer<'a> {
    js_dir: &'a PathBuf,
    params: &'a HashMap<String, String>,
    rng: &'a mut StdRng,
}

impl Renderer<'_> {
    fn render(&mut self, source: &str, depth: usize) -> Result<String> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(CoreError::TemplateResource(
                "jsFile include depth exceeded".to_string(),
            ));
        }

        let mut rendered = String::with_capacity(source.len());
        let mut offset = 0;

        while let Some(start) = source[offset..].find("{{") {
            let start = offset + start;
            rendered.push_str(&source[offset..start]);

            let location = Location::at(source, start);
            let Some(end_offset) = source[start + 2..].find("}}") else {
                return Err(location.error("unclosed placeholder"));
            };
            let end = start + 2 + end_offset;
            let expr = source[start + 2..end].trim();

            let value = self.evaluate(expr, &location, depth)?;
            rendered.push_str(&value);
            offset = end + 2;
        }

        rendered.push_str(&source[offset..]);
        Ok(rendered)
    }

    fn evaluate(&mut self, expr: &str, location: &Location, depth: usize) -> Result<String> {
        let call = Call::parse(expr, location)?;
        match call.path.as_slice() {
            [first, name] if first == "param" && call.args.is_none() => self
                .params
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| location.error(format!("undefined parameter '{}'", name))),
            [helper] if helper == "today" => {
                let args = call.args(location, 0..=1)?;
                let format = match args.first() {
                    Some(Arg::Str(format)) => format.as_str(),
                    Some(Arg::Int(_)) => {
                        return Err(location.error("today() expects a string format"))
                    }
                    None => DEFAULT_TODAY_FORMAT,
                };
                let mut out = String::new();
                write!(out, "{}", Local::now().format(format))
                    .map_err(|_| location.error(format!("invalid date format '{}'", format)))?;
                Ok(out)
            }
            [helper] if helper == "randomInt" => {
                let args = call.args(location, 2..=2)?;
                let (min, max) = match (&args[0], &args[1]) {
                    (Arg::Int(min), Arg::Int(max)) => (*min, *max),
                    _ => return Err(location.error("randomInt() expects integer bounds")),
                };
                if min > max {
                    return Err(location.error("randomInt() bounds are inverted"));
                }
                Ok(self.rng.gen_range(min..=max).to_string())
            }
            [helper] if helper == "randomString" => {
                let args = call.args(location, 1..=1)?;
                let Arg::Int(length) = &args[0] else {
                    return Err(location.error("randomString() expects a length"));
                };
                let length = *length;
                if length < 0 {
                    return Err(location.error("randomString() length is negative"));
                }
                let value: String = (0..length)
                    .map(|_| ALPHANUMERIC[self.rng.gen_range(0..ALPHANUMERIC.len())] as char)
                    .collect();
                Ok(value)
            }
            [first, method] if first == "faker" => {
                call.args(location, 0..=0)?;
                let mut faker = Faker::from_seed(self.rng.gen());
                match method.as_str() {
                    "name" => Ok(faker.name()),
                    "email" => Ok(faker.email()),
                    "phone" | "phone_number" => Ok(faker.phone()),
                    other => Err(location.error(format!("unknown faker method '{}'", other))),
                }
            }
            [helper] if helper == "jsFile" => {
                let args = call.args(location, 1..=1)?;
                let Arg::Str(name) = &args[0] else {
                    return Err(location.error("jsFile() expects a file name"));
                };
                self.include_js_file(name, depth)
            }
            _ => Err(location.error(format!("unknown template expression '{}'", expr))),
        }
    }

    fn include_js_file(&mut self, name: &str, depth: usize) -> Result<String> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(CoreError::TemplateResource(format!(
                "illegal js file name '{}'",
                name
            )));
        }

        let path = self.js_dir.join(name);
        let content = std::fs::read_to_string(&path).map_err(|_| {
            CoreError::TemplateResource(format!("js file not found: {}", path.display()))
        })?;

        // The file may itself use template expressions.
        let rendered = self.render(&content, depth + 1)?;

        // JSON-escape so the code can sit inside a JSON string field.
        let escaped = serde_json::to_string(&rendered)?;
        Ok(escaped[1..escaped.len() - 1].to_string())
    }
}

#[derive(Debug)]
struct Location {
    line: usize,
    column: usize,
}

impl Location {
    fn at(source: &str, offset: usize) -> Self {
        let prefix = &source[..offset];
        let line = prefix.matches('\n').count() + 1;
        let column = offset - prefix.rfind('\n').map(|pos| pos + 1).unwrap_or(0) + 1;
        Self { line, column }
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::TemplateRender {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Arg {
    Str(String),
    Int(i64),
}

struct Call {
    path: Vec<String>,
    args: Option<Vec<Arg>>,
}

impl Call {
    /// Parse `ident(.ident)*` optionally followed by an argument list of
    /// string and integer literals.
    fn parse(expr: &str, location: &Location) -> Result<Self> {
        let (path_part, args) = match expr.find('(') {
            Some(open) => {
                let Some(inner) = expr[open + 1..].strip_suffix(')') else {
                    return Err(location.error("missing closing parenthesis"));
                };
                (expr[..open].trim_end(), Some(Self::parse_args(inner, location)?))
            }
            None => (expr, None),
        };

        if path_part.is_empty() {
            return Err(location.error("empty placeholder"));
        }

        let path: Vec<String> = path_part.split('.').map(|part| part.trim().to_string()).collect();
        for segment in &path {
            if segment.is_empty()
                || !segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(location.error(format!("invalid expression '{}'", expr)));
            }
        }

        Ok(Self { path, args })
    }

    fn parse_args(inner: &str, location: &Location) -> Result<Vec<Arg>> {
        let inner = inner.trim();
        if inner.is_empty() {
            return Ok(Vec::new());
        }

        // Split on commas outside quoted strings.
        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut quote: Option<char> = None;
        for c in inner.chars() {
            match quote {
                Some(q) if c == q => {
                    quote = None;
                    current.push(c);
                }
                Some(_) => current.push(c),
                None if c == '"' || c == '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                None if c == ',' => pieces.push(std::mem::take(&mut current)),
                None => current.push(c),
            }
        }
        if quote.is_some() {
            return Err(location.error("unterminated string argument"));
        }
        pieces.push(current);

        pieces
            .iter()
            .map(|raw| {
                let raw = raw.trim();
                if (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
                    || (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
                {
                    Ok(Arg::Str(raw[1..raw.len() - 1].to_string()))
                } else {
                    raw.parse::<i64>()
                        .map(Arg::Int)
                        .map_err(|_| location.error(format!("invalid argument '{}'", raw)))
                }
            })
            .collect()
    }

    fn args(
        &self,
        location: &Location,
        expected: std::ops::RangeInclusive<usize>,
    ) -> Result<&[Arg]> {
        let Some(args) = &self.args else {
            return Err(location.error("helper call requires parentheses"));
        };
        if !expected.contains(&args.len()) {
            return Err(location.error(format!(
                "expected {} to {} arguments, got {}",
                expected.start(),
                expected.end(),
                args.len()
            )));
        }
        Ok(args)
    }
}
