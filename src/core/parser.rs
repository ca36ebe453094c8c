use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, UpdaterError};
use crate::models::ParsedSettings;

/// 缺少代码块或解析失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// 返回空映射
    Lenient,
    /// 返回 ParseError
    Strict,
}

pub trait Parser: Send + Sync {
    fn can_handle(&self, parser_type: &str) -> bool;

    fn parse(&self, content: &str, mode: ParseMode) -> Result<ParsedSettings>;
}

/// 模式是常量，编译失败只可能是字面量写错
static JSONC_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```jsonc\r?\n(.*?)```").expect("jsonc block regex"));

/// 解析 JSONC 文本为顶层对象
fn parse_jsonc_object(content: &str) -> Result<ParsedSettings> {
    match json5::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(UpdaterError::ParseError(format!(
            "expected an object, got {}",
            kind(&other)
        ))),
        Err(e) => Err(UpdaterError::ParseError(e.to_string())),
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn lenient(result: Result<ParsedSettings>, mode: ParseMode) -> Result<ParsedSettings> {
    match (result, mode) {
        (Ok(map), _) => Ok(map),
        (Err(e), ParseMode::Lenient) => {
            tracing::debug!("lenient parse returned empty settings: {}", e);
            Ok(ParsedSettings::new())
        }
        (Err(e), ParseMode::Strict) => Err(e),
    }
}

/// 从 Markdown 中提取第一个 ```jsonc 代码块。
/// 代码块内容是设置片段而非完整对象，解析前包上 `{ }`。
pub struct JsoncBlockParser;

impl Parser for JsoncBlockParser {
    fn can_handle(&self, parser_type: &str) -> bool {
        parser_type == "jsonc-block"
    }

    fn parse(&self, content: &str, mode: ParseMode) -> Result<ParsedSettings> {
        let result = match JSONC_BLOCK_RE.captures(content) {
            Some(caps) => {
                let block = caps.get(1).map_or("", |m| m.as_str());
                parse_jsonc_object(&format!("{{{block}}}"))
            }
            None => Err(UpdaterError::ParseError(
                "no ```jsonc block found in file content".to_string(),
            )),
        };
        lenient(result, mode)
    }
}

/// 整个文件按 JSONC 解析（.json / .jsonc）
pub struct JsoncFileParser;

impl Parser for JsoncFileParser {
    fn can_handle(&self, parser_type: &str) -> bool {
        matches!(parser_type, "jsonc" | "json" | "jsonc-file")
    }

    fn parse(&self, content: &str, mode: ParseMode) -> Result<ParsedSettings> {
        lenient(parse_jsonc_object(content), mode)
    }
}

/// 按 parser 类型分发，未知类型回退到代码块解析
pub struct ParserRegistry {
    parsers: Vec<Box<dyn Parser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new(vec![Box::new(JsoncBlockParser), Box::new(JsoncFileParser)])
    }
}

impl ParserRegistry {
    pub fn new(parsers: Vec<Box<dyn Parser>>) -> Self {
        Self { parsers }
    }

    pub fn parse(&self, content: &str, parser_type: &str, mode: ParseMode) -> Result<ParsedSettings> {
        match self.parsers.iter().find(|p| p.can_handle(parser_type)) {
            Some(parser) => parser.parse(content, mode),
            None => {
                tracing::debug!("unknown parser type {:?}, using jsonc-block", parser_type);
                JsoncBlockParser.parse(content, mode)
            }
        }
    }
}
