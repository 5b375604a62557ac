//! Schema element definitions in the RFC 4512 description format.
//!
//! Each element type parses from, and formats back to, the parenthesized
//! definition strings a subschema entry publishes, e.g.
//!
//! ```text
//! ( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name X-ORIGIN 'RFC 4519' )
//! ```

use crate::error::DirectoryError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Keywords that stand alone without a value.
const FLAG_KEYWORDS: [&str; 7] = [
    "OBSOLETE",
    "SINGLE-VALUE",
    "COLLECTIVE",
    "NO-USER-MODIFICATION",
    "ABSTRACT",
    "STRUCTURAL",
    "AUXILIARY",
];

/// Extension carrying the file a definition was loaded from.
pub const X_SCHEMA_FILE: &str = "X-SCHEMA-FILE";
/// Extension carrying the document a definition originates from.
pub const X_ORIGIN: &str = "X-ORIGIN";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Quoted(String),
    Word(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '$' => {}
            c if c.is_whitespace() => {}
            '\'' => {
                let mut raw = String::new();
                let mut terminated = false;
                for (_, c) in chars.by_ref() {
                    if c == '\'' {
                        terminated = true;
                        break;
                    }
                    raw.push(c);
                }
                if !terminated {
                    return Err(DirectoryError::schema(format!(
                        "unterminated quoted string at offset {}",
                        start
                    )));
                }
                tokens.push(Token::Quoted(unescape_quoted(&raw)));
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | '\'' | '$') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

/// Resolves `\27` and `\5C` style escapes inside quoted strings.
fn unescape_quoted(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let escaped = (bytes[index] == b'\\')
            .then(|| bytes.get(index + 1..index + 3))
            .flatten()
            .and_then(|pair| std::str::from_utf8(pair).ok())
            .and_then(|pair| u8::from_str_radix(pair, 16).ok());
        match escaped {
            Some(byte) => {
                out.push(byte);
                index += 3;
            }
            None => {
                out.push(bytes[index]);
                index += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\5C").replace('\'', "\\27")
}

/// A definition split into its OID, keyword values, and flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RawDefinition {
    oid: String,
    values: BTreeMap<String, Vec<String>>,
    flags: Vec<String>,
}

impl RawDefinition {
    fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut iter = tokens.into_iter();

        if iter.next() != Some(Token::Open) {
            return Err(DirectoryError::schema(format!(
                "definition must start with '(': {}",
                input.trim()
            )));
        }

        let oid = match iter.next() {
            Some(Token::Word(oid)) | Some(Token::Quoted(oid)) => oid,
            _ => {
                return Err(DirectoryError::schema(format!(
                    "definition is missing its OID: {}",
                    input.trim()
                )));
            }
        };

        let mut raw = Self {
            oid,
            ..Default::default()
        };

        loop {
            let keyword = match iter.next() {
                Some(Token::Close) => break,
                Some(Token::Word(keyword)) => keyword.to_ascii_uppercase(),
                Some(other) => {
                    return Err(DirectoryError::schema(format!(
                        "expected a keyword in definition {}, found {:?}",
                        raw.oid, other
                    )));
                }
                None => {
                    return Err(DirectoryError::schema(format!(
                        "definition {} is missing its closing parenthesis",
                        raw.oid
                    )));
                }
            };

            if FLAG_KEYWORDS.contains(&keyword.as_str()) {
                raw.flags.push(keyword);
                continue;
            }

            let values = match iter.next() {
                Some(Token::Word(value)) | Some(Token::Quoted(value)) => vec![value],
                Some(Token::Open) => {
                    let mut list = Vec::new();
                    loop {
                        match iter.next() {
                            Some(Token::Close) => break,
                            Some(Token::Word(value)) | Some(Token::Quoted(value)) => list.push(value),
                            _ => {
                                return Err(DirectoryError::schema(format!(
                                    "unterminated value list for {} in definition {}",
                                    keyword, raw.oid
                                )));
                            }
                        }
                    }
                    list
                }
                _ => {
                    return Err(DirectoryError::schema(format!(
                        "keyword {} has no value in definition {}",
                        keyword, raw.oid
                    )));
                }
            };

            raw.values.entry(keyword).or_default().extend(values);
        }

        if iter.next().is_some() {
            return Err(DirectoryError::schema(format!(
                "unexpected text after definition {}",
                raw.oid
            )));
        }

        Ok(raw)
    }

    fn take(&mut self, keyword: &str) -> Vec<String> {
        self.values.remove(keyword).unwrap_or_default()
    }

    fn take_one(&mut self, keyword: &str) -> Option<String> {
        self.take(keyword).into_iter().next()
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Whatever `X-` extensions remain.
    fn extensions(&mut self) -> BTreeMap<String, Vec<String>> {
        let keys: Vec<String> = self
            .values
            .keys()
            .filter(|key| key.starts_with("X-"))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.values.remove_entry(&key))
            .collect()
    }
}

/// Extension origin lookup shared by all element types.
fn origin_of(extensions: &BTreeMap<String, Vec<String>>) -> Option<&str> {
    [X_SCHEMA_FILE, X_ORIGIN]
        .iter()
        .find_map(|key| extensions.get(*key).and_then(|values| values.first()))
        .map(String::as_str)
}

/// Writes definition parts in canonical order.
struct DefinitionWriter<'a, 'b> {
    f: &'a mut fmt::Formatter<'b>,
}

impl<'a, 'b> DefinitionWriter<'a, 'b> {
    fn start(f: &'a mut fmt::Formatter<'b>, oid: &str) -> std::result::Result<Self, fmt::Error> {
        write!(f, "( {}", oid)?;
        Ok(Self { f })
    }

    fn names(&mut self, names: &[String]) -> fmt::Result {
        match names {
            [] => Ok(()),
            [name] => write!(self.f, " NAME '{}'", escape_quoted(name)),
            names => {
                write!(self.f, " NAME (")?;
                for name in names {
                    write!(self.f, " '{}'", escape_quoted(name))?;
                }
                write!(self.f, " )")
            }
        }
    }

    fn quoted(&mut self, keyword: &str, value: Option<&str>) -> fmt::Result {
        match value {
            Some(value) => write!(self.f, " {} '{}'", keyword, escape_quoted(value)),
            None => Ok(()),
        }
    }

    fn word(&mut self, keyword: &str, value: Option<&str>) -> fmt::Result {
        match value {
            Some(value) => write!(self.f, " {} {}", keyword, value),
            None => Ok(()),
        }
    }

    fn list(&mut self, keyword: &str, values: &[String]) -> fmt::Result {
        match values {
            [] => Ok(()),
            [value] => write!(self.f, " {} {}", keyword, value),
            values => write!(self.f, " {} ( {} )", keyword, values.join(" $ ")),
        }
    }

    fn flag(&mut self, keyword: &str, set: bool) -> fmt::Result {
        if set {
            write!(self.f, " {}", keyword)?;
        }
        Ok(())
    }

    fn extensions(&mut self, extensions: &BTreeMap<String, Vec<String>>) -> fmt::Result {
        for (key, values) in extensions {
            match values.as_slice() {
                [value] => write!(self.f, " {} '{}'", key, escape_quoted(value))?,
                values => {
                    write!(self.f, " {} (", key)?;
                    for value in values {
                        write!(self.f, " '{}'", escape_quoted(value))?;
                    }
                    write!(self.f, " )")?;
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> fmt::Result {
        write!(self.f, " )")
    }
}

/// How an attribute type is used by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttributeUsage {
    /// Ordinary user attribute
    #[default]
    UserApplications,
    /// Operational attribute
    DirectoryOperation,
    /// Operational attribute shared between servers
    DistributedOperation,
    /// Server-specific operational attribute
    DsaOperation,
}

impl AttributeUsage {
    fn parse(value: &str) -> Result<Self> {
        match value {
            v if v.eq_ignore_ascii_case("userApplications") => Ok(Self::UserApplications),
            v if v.eq_ignore_ascii_case("directoryOperation") => Ok(Self::DirectoryOperation),
            v if v.eq_ignore_ascii_case("distributedOperation") => Ok(Self::DistributedOperation),
            v if v.eq_ignore_ascii_case("dSAOperation") => Ok(Self::DsaOperation),
            other => Err(DirectoryError::schema(format!("unknown attribute usage '{}'", other))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::UserApplications => "userApplications",
            Self::DirectoryOperation => "directoryOperation",
            Self::DistributedOperation => "distributedOperation",
            Self::DsaOperation => "dSAOperation",
        }
    }
}

/// An attribute type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeTypeDefinition {
    /// Numeric OID
    pub oid: String,
    /// Short names
    pub names: Vec<String>,
    /// Description
    pub description: Option<String>,
    /// Marked obsolete
    pub obsolete: bool,
    /// Superior attribute type
    pub superior: Option<String>,
    /// Equality matching rule
    pub equality: Option<String>,
    /// Ordering matching rule
    pub ordering: Option<String>,
    /// Substring matching rule
    pub substring: Option<String>,
    /// Syntax OID, possibly with a `{length}` bound
    pub syntax: Option<String>,
    /// Single-valued
    pub single_value: bool,
    /// Collective
    pub collective: bool,
    /// Not modifiable by users
    pub no_user_modification: bool,
    /// Attribute usage
    pub usage: AttributeUsage,
    /// `X-` extensions
    pub extensions: BTreeMap<String, Vec<String>>,
}

impl AttributeTypeDefinition {
    /// Parses an `attributeTypes` value.
    ///
    /// # Errors
    /// Returns a schema error if the definition is malformed
    pub fn parse(input: &str) -> Result<Self> {
        let mut raw = RawDefinition::parse(input)?;
        let usage = raw
            .take_one("USAGE")
            .map(|usage| AttributeUsage::parse(&usage))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            names: raw.take("NAME"),
            description: raw.take_one("DESC"),
            obsolete: raw.has_flag("OBSOLETE"),
            superior: raw.take_one("SUP"),
            equality: raw.take_one("EQUALITY"),
            ordering: raw.take_one("ORDERING"),
            substring: raw.take_one("SUBSTR"),
            syntax: raw.take_one("SYNTAX"),
            single_value: raw.has_flag("SINGLE-VALUE"),
            collective: raw.has_flag("COLLECTIVE"),
            no_user_modification: raw.has_flag("NO-USER-MODIFICATION"),
            usage,
            extensions: raw.extensions(),
            oid: raw.oid,
        })
    }

    /// First name, or the OID for unnamed types.
    pub fn name(&self) -> &str {
        self.names.first().map_or(self.oid.as_str(), String::as_str)
    }

    /// Whether `name` is one of the short names, ignoring case.
    pub fn has_name(&self, name: &str) -> bool {
        self.oid == name || self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Schema file or document the definition came from.
    pub fn origin(&self) -> Option<&str> {
        origin_of(&self.extensions)
    }
}

impl fmt::Display for AttributeTypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut w = DefinitionWriter::start(f, &self.oid)?;
        w.names(&self.names)?;
        w.quoted("DESC", self.description.as_deref())?;
        w.flag("OBSOLETE", self.obsolete)?;
        w.word("SUP", self.superior.as_deref())?;
        w.word("EQUALITY", self.equality.as_deref())?;
        w.word("ORDERING", self.ordering.as_deref())?;
        w.word("SUBSTR", self.substring.as_deref())?;
        w.word("SYNTAX", self.syntax.as_deref())?;
        w.flag("SINGLE-VALUE", self.single_value)?;
        w.flag("COLLECTIVE", self.collective)?;
        w.flag("NO-USER-MODIFICATION", self.no_user_modification)?;
        if self.usage != AttributeUsage::UserApplications {
            w.word("USAGE", Some(self.usage.as_str()))?;
        }
        w.extensions(&self.extensions)?;
        w.finish()
    }
}

/// Kind of an object class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectClassKind {
    /// Abstract class
    Abstract,
    /// Structural class
    #[default]
    Structural,
    /// Auxiliary class
    Auxiliary,
}

/// An object class definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClassDefinition {
    /// Numeric OID
    pub oid: String,
    /// Short names
    pub names: Vec<String>,
    /// Description
    pub description: Option<String>,
    /// Marked obsolete
    pub obsolete: bool,
    /// Superior classes
    pub superiors: Vec<String>,
    /// Class kind
    pub kind: ObjectClassKind,
    /// Required attributes
    pub must: Vec<String>,
    /// Allowed attributes
    pub may: Vec<String>,
    /// `X-` extensions
    pub extensions: BTreeMap<String, Vec<String>>,
}

impl ObjectClassDefinition {
    /// Parses an `objectClasses` value.
    ///
    /// # Errors
    /// Returns a schema error if the definition is malformed
    pub fn parse(input: &str) -> Result<Self> {
        let mut raw = RawDefinition::parse(input)?;
        let kind = if raw.has_flag("ABSTRACT") {
            ObjectClassKind::Abstract
        } else if raw.has_flag("AUXILIARY") {
            ObjectClassKind::Auxiliary
        } else {
            ObjectClassKind::Structural
        };

        Ok(Self {
            names: raw.take("NAME"),
            description: raw.take_one("DESC"),
            obsolete: raw.has_flag("OBSOLETE"),
            superiors: raw.take("SUP"),
            kind,
            must: raw.take("MUST"),
            may: raw.take("MAY"),
            extensions: raw.extensions(),
            oid: raw.oid,
        })
    }

    /// First short name, or the OID.
    pub fn name(&self) -> &str {
        self.names.first().map_or(self.oid.as_str(), String::as_str)
    }

    /// Whether `name` is one of the short names, ignoring case.
    pub fn has_name(&self, name: &str) -> bool {
        self.oid == name || self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Schema file the class came from, when the server reported it.
    pub fn origin(&self) -> Option<&str> {
        origin_of(&self.extensions)
    }
}

impl fmt::Display for ObjectClassDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut w = DefinitionWriter::start(f, &self.oid)?;
        w.names(&self.names)?;
        w.quoted("DESC", self.description.as_deref())?;
        w.flag("OBSOLETE", self.obsolete)?;
        w.list("SUP", &self.superiors)?;
        w.flag("ABSTRACT", self.kind == ObjectClassKind::Abstract)?;
        w.flag("STRUCTURAL", self.kind == ObjectClassKind::Structural)?;
        w.flag("AUXILIARY", self.kind == ObjectClassKind::Auxiliary)?;
        w.list("MUST", &self.must)?;
        w.list("MAY", &self.may)?;
        w.extensions(&self.extensions)?;
        w.finish()
    }
}

/// A matching rule definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRuleDefinition {
    /// Numeric OID
    pub oid: String,
    /// Short names
    pub names: Vec<String>,
    /// Description
    pub description: Option<String>,
    /// Marked obsolete
    pub obsolete: bool,
    /// Syntax OID
    pub syntax: String,
    /// `X-` extensions
    pub extensions: BTreeMap<String, Vec<String>>,
}

impl MatchingRuleDefinition {
    /// Parses a `matchingRules` value.
    ///
    /// # Errors
    /// Returns a schema error if the definition is malformed or has no syntax
    pub fn parse(input: &str) -> Result<Self> {
        let mut raw = RawDefinition::parse(input)?;
        let syntax = raw.take_one("SYNTAX").ok_or_else(|| {
            DirectoryError::schema(format!("matching rule {} has no SYNTAX", raw.oid))
        })?;

        Ok(Self {
            names: raw.take("NAME"),
            description: raw.take_one("DESC"),
            obsolete: raw.has_flag("OBSOLETE"),
            syntax,
            extensions: raw.extensions(),
            oid: raw.oid,
        })
    }

    /// First short name, or the OID.
    pub fn name(&self) -> &str {
        self.names.first().map_or(self.oid.as_str(), String::as_str)
    }

    /// Schema file the rule came from, when the server reported it.
    pub fn origin(&self) -> Option<&str> {
        origin_of(&self.extensions)
    }
}

impl fmt::Display for MatchingRuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut w = DefinitionWriter::start(f, &self.oid)?;
        w.names(&self.names)?;
        w.quoted("DESC", self.description.as_deref())?;
        w.flag("OBSOLETE", self.obsolete)?;
        w.word("SYNTAX", Some(self.syntax.as_str()))?;
        w.extensions(&self.extensions)?;
        w.finish()
    }
}

/// An attribute syntax definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxDefinition {
    /// Numeric OID
    pub oid: String,
    /// Description
    pub description: Option<String>,
    /// `X-` extensions
    pub extensions: BTreeMap<String, Vec<String>>,
}

impl SyntaxDefinition {
    /// Parses an `ldapSyntaxes` value.
    ///
    /// # Errors
    /// Returns a schema error if the definition is malformed
    pub fn parse(input: &str) -> Result<Self> {
        let mut raw = RawDefinition::parse(input)?;
        Ok(Self {
            description: raw.take_one("DESC"),
            extensions: raw.extensions(),
            oid: raw.oid,
        })
    }

    /// Schema file the syntax came from, when the server reported it.
    pub fn origin(&self) -> Option<&str> {
        origin_of(&self.extensions)
    }
}

impl fmt::Display for SyntaxDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut w = DefinitionWriter::start(f, &self.oid)?;
        w.quoted("DESC", self.description.as_deref())?;
        w.extensions(&self.extensions)?;
        w.finish()
    }
}
