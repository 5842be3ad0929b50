//! XML-RPC wire codec: `methodCall` encoding and `methodResponse` decoding.
//!
//! Only the value types supervisord actually emits are modelled. Dates and
//! base64 payloads decode as their raw text.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use super::{ProcessInfo, ProcessState};
use crate::core::errors::{CheckError, Result};

/// A decoded XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Double(f64),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Look up a struct member.
    #[must_use]
    pub fn member(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Struct(members) => members.get(key),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

// ──────────────────── encoding ────────────────────

/// Render a complete `methodCall` document.
#[must_use]
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(128);
    out.push_str("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            let _ = write!(out, "<int>{i}</int>");
        }
        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        Value::Str(s) => {
            let _ = write!(out, "<string>{}</string>", escape(s.as_str()));
        }
        Value::Double(d) => {
            let _ = write!(out, "<double>{d}</double>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                let _ = write!(out, "<member><name>{}</name>", escape(name.as_str()));
                encode_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

// ──────────────────── decoding ────────────────────

fn decode_err(details: impl fmt::Display) -> CheckError {
    CheckError::RpcDecode {
        details: details.to_string(),
    }
}

/// Structural token after skipping declarations, comments and whitespace.
enum Token {
    Open(String),
    Empty(String),
    Close(String),
    Text(String),
    Eof,
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> Parser<'a> {
    fn new(xml: &'a str) -> Self {
        Self {
            reader: Reader::from_str(xml),
        }
    }

    /// Next token, text included verbatim.
    fn raw_token(&mut self) -> Result<Token> {
        loop {
            let token = match self.reader.read_event().map_err(decode_err)? {
                Event::Start(start) => {
                    Token::Open(String::from_utf8_lossy(start.name().as_ref()).into_owned())
                }
                Event::Empty(start) => {
                    Token::Empty(String::from_utf8_lossy(start.name().as_ref()).into_owned())
                }
                Event::End(end) => {
                    Token::Close(String::from_utf8_lossy(end.name().as_ref()).into_owned())
                }
                Event::Text(text) => Token::Text(text.unescape().map_err(decode_err)?.into_owned()),
                Event::CData(data) => {
                    Token::Text(String::from_utf8_lossy(&data.into_inner()).into_owned())
                }
                Event::Eof => Token::Eof,
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) | Event::Comment(_) => continue,
            };
            return Ok(token);
        }
    }

    /// Next token that is not inter-element whitespace.
    fn token(&mut self) -> Result<Token> {
        loop {
            match self.raw_token()? {
                Token::Text(text) if text.trim().is_empty() => {}
                other => return Ok(other),
            }
        }
    }

    fn expect_open(&mut self, name: &str) -> Result<()> {
        match self.token()? {
            Token::Open(tag) if tag == name => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<()> {
        match self.token()? {
            Token::Close(tag) if tag == name => Ok(()),
            other => Err(unexpected(&format!("/{name}"), &other)),
        }
    }

    /// Text content up to the closing tag of the current element.
    fn text_until_close(&mut self, name: &str) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.raw_token()? {
                Token::Text(chunk) => text.push_str(&chunk),
                Token::Close(tag) if tag == name => return Ok(text),
                other => return Err(unexpected(&format!("/{name}"), &other)),
            }
        }
    }

    /// Parse the body of a `<value>` whose opening tag was already consumed,
    /// including its closing tag.
    fn value_body(&mut self) -> Result<Value> {
        let mut untyped = String::new();
        loop {
            match self.raw_token()? {
                Token::Text(chunk) => untyped.push_str(&chunk),
                Token::Close(tag) if tag == "value" => return Ok(Value::Str(untyped)),
                Token::Open(tag) => {
                    let value = self.typed(&tag)?;
                    self.expect_close("value")?;
                    return Ok(value);
                }
                Token::Empty(tag) => {
                    let value = empty_typed(&tag)?;
                    self.expect_close("value")?;
                    return Ok(value);
                }
                other => return Err(unexpected("value content", &other)),
            }
        }
    }

    fn typed(&mut self, tag: &str) -> Result<Value> {
        match tag {
            "int" | "i4" | "i8" => {
                let text = self.text_until_close(tag)?;
                text.trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|e| decode_err(format!("bad <{tag}> {text:?}: {e}")))
            }
            "boolean" => match self.text_until_close(tag)?.trim() {
                "1" => Ok(Value::Bool(true)),
                "0" => Ok(Value::Bool(false)),
                other => Err(decode_err(format!("bad <boolean> {other:?}"))),
            },
            "double" => {
                let text = self.text_until_close(tag)?;
                text.trim()
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|e| decode_err(format!("bad <double> {text:?}: {e}")))
            }
            "string" | "dateTime.iso8601" | "base64" => self.text_until_close(tag).map(Value::Str),
            "nil" => {
                self.expect_close("nil")?;
                Ok(Value::Nil)
            }
            "array" => self.array(),
            "struct" => self.structure(),
            other => Err(decode_err(format!("unsupported value type <{other}>"))),
        }
    }

    fn array(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        match self.token()? {
            Token::Empty(tag) if tag == "data" => {}
            Token::Open(tag) if tag == "data" => loop {
                match self.token()? {
                    Token::Open(tag) if tag == "value" => items.push(self.value_body()?),
                    Token::Close(tag) if tag == "data" => break,
                    other => return Err(unexpected("value or /data", &other)),
                }
            },
            other => return Err(unexpected("data", &other)),
        }
        self.expect_close("array")?;
        Ok(Value::Array(items))
    }

    fn structure(&mut self) -> Result<Value> {
        let mut members = BTreeMap::new();
        loop {
            match self.token()? {
                Token::Open(tag) if tag == "member" => {
                    self.expect_open("name")?;
                    let name = self.text_until_close("name")?;
                    self.expect_open("value")?;
                    let value = self.value_body()?;
                    self.expect_close("member")?;
                    members.insert(name, value);
                }
                Token::Close(tag) if tag == "struct" => return Ok(Value::Struct(members)),
                other => return Err(unexpected("member or /struct", &other)),
            }
        }
    }
}

fn empty_typed(tag: &str) -> Result<Value> {
    match tag {
        "string" | "base64" => Ok(Value::Str(String::new())),
        "nil" => Ok(Value::Nil),
        "struct" => Ok(Value::Struct(BTreeMap::new())),
        other => Err(decode_err(format!("empty <{other}/> is not a value"))),
    }
}

fn unexpected(wanted: &str, got: &Token) -> CheckError {
    let got = match got {
        Token::Open(tag) => format!("<{tag}>"),
        Token::Empty(tag) => format!("<{tag}/>"),
        Token::Close(tag) => format!("</{tag}>"),
        Token::Text(text) => format!("text {text:?}"),
        Token::Eof => "end of document".to_string(),
    };
    decode_err(format!("expected {wanted}, found {got}"))
}

/// Decode a `methodResponse`. A `<fault>` becomes [`CheckError::RpcFault`].
pub fn decode_response(xml: &str) -> Result<Value> {
    let mut parser = Parser::new(xml);
    parser.expect_open("methodResponse")?;
    match parser.token()? {
        Token::Open(tag) if tag == "params" => {
            parser.expect_open("param")?;
            parser.expect_open("value")?;
            let value = parser.value_body()?;
            parser.expect_close("param")?;
            parser.expect_close("params")?;
            Ok(value)
        }
        Token::Open(tag) if tag == "fault" => {
            parser.expect_open("value")?;
            let fault = parser.value_body()?;
            let code = fault
                .member("faultCode")
                .and_then(Value::as_int)
                .unwrap_or_default();
            let message = fault
                .member("faultString")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Err(CheckError::RpcFault { code, message })
        }
        other => Err(unexpected("params or fault", &other)),
    }
}

/// Convert one `getProcessInfo`-style struct into a descriptor.
pub fn process_info_from_value(value: &Value) -> Result<ProcessInfo> {
    let text = |key: &str| -> Result<String> {
        value
            .member(key)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| decode_err(format!("process info missing string member {key:?}")))
    };
    let state = value
        .member("state")
        .and_then(Value::as_int)
        .ok_or_else(|| decode_err("process info missing integer member \"state\""))?;
    let pid = value
        .member("pid")
        .and_then(Value::as_int)
        .and_then(|pid| u32::try_from(pid).ok())
        .unwrap_or_default();

    Ok(ProcessInfo {
        name: text("name")?,
        group: text("group")?,
        state: ProcessState::from_code(state),
        pid,
        description: text("description").unwrap_or_default(),
    })
}

/// Convert the `getAllProcessInfo` array.
pub fn process_list_from_value(value: &Value) -> Result<Vec<ProcessInfo>> {
    match value {
        Value::Array(items) => items.iter().map(process_info_from_value).collect(),
        other => Err(decode_err(format!("expected array of process info, got {other:?}"))),
    }
}
