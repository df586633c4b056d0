//! Juliet test case naming convention.
//!
//! A file such as `CWE190_Integer_Overflow__unsigned_int_max_preinc_54e.c`
//! splits into the CWE id (`190`), the CWE description (`Integer_Overflow`),
//! the functional variant (data type `unsigned_int`, source `max`, sink
//! `preinc`) and the flow variant (`54`) with file part `e`. Sibling files of a
//! multi-file flow variant share a [`CaseId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::flow::FlowVariant;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("`{0}` does not start with a CWE identifier")]
    NotACase(String),
    #[error("`{0}` has no `__` separator before the functional variant")]
    MissingSeparator(String),
    #[error("invalid CWE number in `{0}`")]
    BadCweId(String),
    #[error("unknown data type in functional variant `{0}`")]
    UnknownDataType(String),
    #[error("invalid flow variant `{0}`")]
    BadFlowVariant(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CweId(pub u32);

impl CweId {
    /// Extracts a CWE number from the spellings analyzers use in rule ids and
    /// tags: `CWE-190`, `cwe190`, `external/cwe/cwe-190`, `CWE 561`.
    pub fn from_tag(tag: &str) -> Option<CweId> {
        let lower = tag.to_ascii_lowercase();
        let start = lower.rfind("cwe")? + 3;
        let digits: String = lower[start..]
            .trim_start_matches(|c: char| c == '-' || c == '_' || c == ' ' || c == '/')
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok().map(CweId)
    }
}

impl fmt::Display for CweId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CWE{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Char,
    WcharT,
    UnsignedChar,
    Short,
    Int,
    UnsignedInt,
    Int64T,
    Long,
    LongLong,
    SizeT,
    Float,
    Double,
}

impl DataType {
    /// Every known type, longest token first so that `unsigned_int` wins over
    /// `int` and `int64_t` over `int`.
    const BY_TOKEN_LENGTH: [DataType; 12] = [
        DataType::UnsignedChar,
        DataType::UnsignedInt,
        DataType::LongLong,
        DataType::Int64T,
        DataType::WcharT,
        DataType::Double,
        DataType::SizeT,
        DataType::Float,
        DataType::Short,
        DataType::Char,
        DataType::Long,
        DataType::Int,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            DataType::Char => "char",
            DataType::WcharT => "wchar_t",
            DataType::UnsignedChar => "unsigned_char",
            DataType::Short => "short",
            DataType::Int => "int",
            DataType::UnsignedInt => "unsigned_int",
            DataType::Int64T => "int64_t",
            DataType::Long => "long",
            DataType::LongLong => "long_long",
            DataType::SizeT => "size_t",
            DataType::Float => "float",
            DataType::Double => "double",
        }
    }

    /// Splits a functional variant into its leading data type and the rest.
    fn split_prefix(functional: &str) -> Option<(DataType, &str)> {
        Self::BY_TOKEN_LENGTH.iter().find_map(|ty| {
            let token = ty.token();
            if functional == token {
                Some((*ty, ""))
            } else {
                functional
                    .strip_prefix(token)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| (*ty, rest))
            }
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for DataType {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::BY_TOKEN_LENGTH
            .iter()
            .copied()
            .find(|ty| ty.token() == s)
            .ok_or_else(|| NameError::UnknownDataType(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkOp {
    Preinc,
    Postinc,
    Predec,
    Postdec,
    Add,
    Sub,
    Multiply,
    Square,
}

impl SinkOp {
    pub const ALL: [SinkOp; 8] = [
        SinkOp::Preinc,
        SinkOp::Postinc,
        SinkOp::Predec,
        SinkOp::Postdec,
        SinkOp::Add,
        SinkOp::Sub,
        SinkOp::Multiply,
        SinkOp::Square,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            SinkOp::Preinc => "preinc",
            SinkOp::Postinc => "postinc",
            SinkOp::Predec => "predec",
            SinkOp::Postdec => "postdec",
            SinkOp::Add => "add",
            SinkOp::Sub => "sub",
            SinkOp::Multiply => "multiply",
            SinkOp::Square => "square",
        }
    }

    fn from_token(token: &str) -> Option<SinkOp> {
        Self::ALL.iter().copied().find(|op| op.token() == token)
    }
}

impl fmt::Display for SinkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// How much control an attacker has over the value a source produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceClass {
    /// Deterministic type bound (`max`, `min`).
    Boundary,
    /// `rand()` / `RAND32()` / `RAND64()`.
    Random,
    /// Console, file, environment or socket input.
    External,
    Unknown,
}

impl SourceClass {
    pub fn of(source: &str) -> SourceClass {
        match source {
            "max" | "min" | "large" => SourceClass::Boundary,
            "rand" => SourceClass::Random,
            "fgets" | "fscanf" | "console" | "environment" | "file" | "connect_socket"
            | "listen_socket" => SourceClass::External,
            _ => SourceClass::Unknown,
        }
    }
}

/// Trailing component of a file name after the flow variant number.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilePart {
    /// `_54e.c`: one of several translation units of a multi-file variant.
    Letter(char),
    /// `_81_goodG2B.cpp`: a translation unit dedicated to one role.
    Role(String),
}

/// Name of a test case, independent of how many files implement it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseName {
    pub cwe: CweId,
    pub description: String,
    pub data_type: DataType,
    pub source: Option<String>,
    pub sink: Option<SinkOp>,
    pub flow: FlowVariant,
    pub part: Option<FilePart>,
    pub extension: Option<String>,
}

impl CaseName {
    /// Parses a file name (`.c`/`.cpp`) or a bare case stem.
    pub fn parse(file_name: &str) -> Result<CaseName, NameError> {
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if ext == "c" || ext == "cpp" => (stem, Some(ext.to_string())),
            _ => (file_name, None),
        };

        let rest = stem
            .strip_prefix("CWE")
            .ok_or_else(|| NameError::NotACase(file_name.to_string()))?;
        let (left, functional) = rest
            .split_once("__")
            .ok_or_else(|| NameError::MissingSeparator(file_name.to_string()))?;

        let digits_end = left
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(left.len());
        let cwe: u32 = left[..digits_end]
            .parse()
            .map_err(|_| NameError::BadCweId(file_name.to_string()))?;
        let description = left[digits_end..]
            .strip_prefix('_')
            .filter(|d| !d.is_empty())
            .ok_or_else(|| NameError::BadCweId(file_name.to_string()))?
            .to_string();

        let (body, flow, part) = split_flow_suffix(functional)
            .ok_or_else(|| NameError::BadFlowVariant(functional.to_string()))?;

        let (data_type, remainder) = DataType::split_prefix(body)
            .ok_or_else(|| NameError::UnknownDataType(body.to_string()))?;

        let mut tokens: Vec<&str> = if remainder.is_empty() {
            Vec::new()
        } else {
            remainder.split('_').collect()
        };
        let sink = tokens.last().and_then(|last| SinkOp::from_token(last));
        if sink.is_some() {
            tokens.pop();
        }
        let source = if tokens.is_empty() {
            None
        } else {
            Some(tokens.join("_"))
        };

        Ok(CaseName {
            cwe: CweId(cwe),
            description,
            data_type,
            source,
            sink,
            flow,
            part,
            extension,
        })
    }

    /// `<type>[_<source>][_<sink>]`
    pub fn functional_variant(&self) -> String {
        let mut out = self.data_type.token().to_string();
        if let Some(source) = &self.source {
            out.push('_');
            out.push_str(source);
        }
        if let Some(sink) = &self.sink {
            out.push('_');
            out.push_str(sink.token());
        }
        out
    }

    pub fn case_id(&self) -> CaseId {
        CaseId(format!(
            "CWE{}_{}__{}_{}",
            self.cwe.0,
            self.description,
            self.functional_variant(),
            self.flow
        ))
    }

    pub fn source_class(&self) -> SourceClass {
        self.source
            .as_deref()
            .map(SourceClass::of)
            .unwrap_or(SourceClass::Unknown)
    }

    pub fn is_cpp(&self) -> bool {
        self.extension.as_deref() == Some("cpp")
    }
}

impl fmt::Display for CaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.case_id())?;
        match &self.part {
            Some(FilePart::Letter(letter)) => write!(f, "{letter}")?,
            Some(FilePart::Role(role)) => write!(f, "_{role}")?,
            None => {}
        }
        if let Some(ext) = &self.extension {
            write!(f, ".{ext}")?;
        }
        Ok(())
    }
}

impl FromStr for CaseName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaseName::parse(s)
    }
}

/// Parses a two-digit flow variant with an optional part letter (`54e`).
fn parse_variant_token(token: &str) -> Option<(FlowVariant, Option<char>)> {
    let bytes = token.as_bytes();
    let (digits, letter) = match bytes.len() {
        2 => (token, None),
        3 if bytes[2].is_ascii_lowercase() => (&token[..2], Some(bytes[2] as char)),
        _ => return None,
    };
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: u16 = digits.parse().ok()?;
    Some((FlowVariant(number), letter))
}

fn split_flow_suffix(functional: &str) -> Option<(&str, FlowVariant, Option<FilePart>)> {
    let (body, last) = functional.rsplit_once('_')?;
    if let Some((flow, letter)) = parse_variant_token(last) {
        return Some((body, flow, letter.map(FilePart::Letter)));
    }

    // `<functional>_81_bad`: the last token names a role.
    let (body, token) = body.rsplit_once('_')?;
    let (flow, letter) = parse_variant_token(token)?;
    if letter.is_some() || !(last.starts_with("bad") || last.starts_with("good")) {
        return None;
    }
    Some((body, flow, Some(FilePart::Role(last.to_string()))))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodKind {
    /// The exported `<case>_good()` dispatcher.
    Entry,
    /// Point-flaw fixes: `good1()`, `good2()`, ...
    Numbered(u8),
    /// Good source, bad sink.
    #[serde(rename = "g2b")]
    G2B(Option<u8>),
    /// Bad source, good sink.
    #[serde(rename = "b2g")]
    B2G(Option<u8>),
    /// `helperGood()` style helpers.
    Helper,
}

impl GoodKind {
    /// Coarse bucket used when aggregating false positives.
    pub fn family(&self) -> &'static str {
        match self {
            GoodKind::Entry => "good",
            GoodKind::Numbered(_) => "goodN",
            GoodKind::G2B(_) => "G2B",
            GoodKind::B2G(_) => "B2G",
            GoodKind::Helper => "helper",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionRole {
    Bad,
    Good(GoodKind),
    /// `main`, print helpers and anything else outside the labels.
    Neutral,
}

impl fmt::Display for FunctionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = |n: &Option<u8>| n.map(|n| n.to_string()).unwrap_or_default();
        match self {
            FunctionRole::Bad => f.write_str("bad"),
            FunctionRole::Good(GoodKind::Entry) => f.write_str("good"),
            FunctionRole::Good(GoodKind::Numbered(n)) => write!(f, "good{n}"),
            FunctionRole::Good(GoodKind::G2B(n)) => write!(f, "goodG2B{}", suffix(n)),
            FunctionRole::Good(GoodKind::B2G(n)) => write!(f, "goodB2G{}", suffix(n)),
            FunctionRole::Good(GoodKind::Helper) => f.write_str("helperGood"),
            FunctionRole::Neutral => f.write_str("neutral"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionPart {
    Whole,
    Source,
    Sink,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    /// A correct analyzer reports the flaw here.
    Flagged,
    /// A correct analyzer stays silent here.
    Clean,
    /// Outside the labeled paths.
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionLabel {
    pub role: FunctionRole,
    pub part: FunctionPart,
}

impl FunctionLabel {
    const NEUTRAL: FunctionLabel = FunctionLabel {
        role: FunctionRole::Neutral,
        part: FunctionPart::Whole,
    };

    pub fn expectation(&self) -> Expectation {
        match self.role {
            FunctionRole::Bad => Expectation::Flagged,
            FunctionRole::Good(_) => Expectation::Clean,
            FunctionRole::Neutral => Expectation::Ignored,
        }
    }
}

/// Labels a function defined in one of the case's files. Accepts both the
/// exported spelling (`<case>_bad`, `<case>b_goodG2BSink`) and the static
/// spelling (`goodB2G1`, `badSink`).
pub fn classify_function(case: &CaseId, function: &str) -> FunctionLabel {
    let local = strip_case_prefix(case.as_str(), function).unwrap_or(function);

    if let Some(rest) = local.strip_prefix("helperBad") {
        return FunctionLabel {
            role: FunctionRole::Bad,
            part: part_of(rest),
        };
    }
    if let Some(rest) = local.strip_prefix("helperGood") {
        return FunctionLabel {
            role: FunctionRole::Good(GoodKind::Helper),
            part: part_of(rest),
        };
    }
    if let Some(rest) = local.strip_prefix("bad") {
        return FunctionLabel {
            role: FunctionRole::Bad,
            part: part_of(rest),
        };
    }
    if let Some(rest) = local.strip_prefix("goodG2B") {
        let (number, rest) = leading_number(rest);
        return FunctionLabel {
            role: FunctionRole::Good(GoodKind::G2B(number)),
            part: part_of(rest),
        };
    }
    if let Some(rest) = local.strip_prefix("goodB2G") {
        let (number, rest) = leading_number(rest);
        return FunctionLabel {
            role: FunctionRole::Good(GoodKind::B2G(number)),
            part: part_of(rest),
        };
    }
    if let Some(rest) = local.strip_prefix("good") {
        let (number, rest) = leading_number(rest);
        let kind = match number {
            Some(n) => GoodKind::Numbered(n),
            None => GoodKind::Entry,
        };
        return FunctionLabel {
            role: FunctionRole::Good(kind),
            part: part_of(rest),
        };
    }

    FunctionLabel::NEUTRAL
}

/// `<case>_x` or `<case>b_x` (multi-file part letter) become `x`.
fn strip_case_prefix<'a>(case: &str, function: &'a str) -> Option<&'a str> {
    let rest = function.strip_prefix(case)?;
    if let Some(local) = rest.strip_prefix('_') {
        return Some(local);
    }
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some('_')) if letter.is_ascii_lowercase() => Some(&rest[2..]),
        _ => None,
    }
}

fn leading_number(rest: &str) -> (Option<u8>, &str) {
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    (rest[..end].parse().ok(), &rest[end..])
}

fn part_of(rest: &str) -> FunctionPart {
    if rest.contains("Source") {
        FunctionPart::Source
    } else if rest.ends_with("Sink") {
        FunctionPart::Sink
    } else {
        FunctionPart::Whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_file_part() {
        let name =
            CaseName::parse("CWE190_Integer_Overflow__unsigned_int_max_preinc_54e.c").unwrap();
        assert_eq!(name.cwe, CweId(190));
        assert_eq!(name.description, "Integer_Overflow");
        assert_eq!(name.data_type, DataType::UnsignedInt);
        assert_eq!(name.source.as_deref(), Some("max"));
        assert_eq!(name.sink, Some(SinkOp::Preinc));
        assert_eq!(name.flow, FlowVariant(54));
        assert_eq!(name.part, Some(FilePart::Letter('e')));
        assert_eq!(
            name.case_id().as_str(),
            "CWE190_Integer_Overflow__unsigned_int_max_preinc_54"
        );
    }

    #[test]
    fn parses_multi_word_source_without_sink() {
        let name = CaseName::parse(
            "CWE427_Uncontrolled_Search_Path_Element__wchar_t_connect_socket_22a.c",
        )
        .unwrap();
        assert_eq!(name.data_type, DataType::WcharT);
        assert_eq!(name.source.as_deref(), Some("connect_socket"));
        assert_eq!(name.sink, None);
        assert_eq!(name.source_class(), SourceClass::External);
    }

    #[test]
    fn parses_type_only_point_flaw() {
        let name = CaseName::parse("CWE459_Incomplete_Cleanup__char_18.c").unwrap();
        assert_eq!(name.data_type, DataType::Char);
        assert_eq!(name.source, None);
        assert_eq!(name.sink, None);
        assert_eq!(name.flow, FlowVariant(18));
        assert_eq!(name.part, None);
    }

    #[test]
    fn int_does_not_shadow_int64() {
        let name = CaseName::parse("CWE190_Integer_Overflow__int64_t_rand_preinc_44.c").unwrap();
        assert_eq!(name.data_type, DataType::Int64T);
        let plain = CaseName::parse("CWE190_Integer_Overflow__int_fgets_postinc_65b.c").unwrap();
        assert_eq!(plain.data_type, DataType::Int);
        assert_eq!(plain.source.as_deref(), Some("fgets"));
    }

    #[test]
    fn parses_role_file_of_virtual_dispatch_variant() {
        let name = CaseName::parse("CWE190_Integer_Overflow__int_rand_square_81_goodB2G.cpp")
            .unwrap();
        assert_eq!(name.flow, FlowVariant(81));
        assert_eq!(name.part, Some(FilePart::Role("goodB2G".to_string())));
        assert!(name.is_cpp());
        assert_eq!(
            name.to_string(),
            "CWE190_Integer_Overflow__int_rand_square_81_goodB2G.cpp"
        );
    }

    #[test]
    fn rejects_non_case_names() {
        assert!(matches!(
            CaseName::parse("io.c"),
            Err(NameError::NotACase(_))
        ));
        assert!(matches!(
            CaseName::parse("CWE190_Integer_Overflow_int_max_preinc_01.c"),
            Err(NameError::MissingSeparator(_))
        ));
        assert!(matches!(
            CaseName::parse("CWE121_Stack_Based_Buffer_Overflow__CWE129_fgets_01.c"),
            Err(NameError::UnknownDataType(_))
        ));
        assert!(matches!(
            CaseName::parse("CWE190_Integer_Overflow__int_max_preinc_1.c"),
            Err(NameError::BadFlowVariant(_))
        ));
    }

    #[test]
    fn display_round_trips() {
        for name in [
            "CWE191_Integer_Underflow__int64_t_min_postdec_52c.c",
            "CWE191_Integer_Underflow__char_rand_postdec_09.c",
            "CWE459_Incomplete_Cleanup__char_18.c",
            "CWE190_Integer_Overflow__int_fgets_postinc_65b",
        ] {
            assert_eq!(CaseName::parse(name).unwrap().to_string(), name);
        }
    }

    #[test]
    fn cwe_tags() {
        assert_eq!(CweId::from_tag("CWE-190"), Some(CweId(190)));
        assert_eq!(CweId::from_tag("external/cwe/cwe-191"), Some(CweId(191)));
        assert_eq!(CweId::from_tag("CWE 561 Dead Code"), Some(CweId(561)));
        assert_eq!(CweId::from_tag("CWE367"), Some(CweId(367)));
        assert_eq!(CweId::from_tag("integerOverflow"), None);
    }

    #[test]
    fn classifies_exported_and_static_functions() {
        let case = CaseName::parse("CWE191_Integer_Underflow__int_fgets_postdec_63b.c")
            .unwrap()
            .case_id();

        let bad_sink = classify_function(&case, "CWE191_Integer_Underflow__int_fgets_postdec_63b_badSink");
        assert_eq!(bad_sink.role, FunctionRole::Bad);
        assert_eq!(bad_sink.part, FunctionPart::Sink);
        assert_eq!(bad_sink.expectation(), Expectation::Flagged);

        let b2g = classify_function(&case, "CWE191_Integer_Underflow__int_fgets_postdec_63b_goodB2GSink");
        assert_eq!(b2g.role, FunctionRole::Good(GoodKind::B2G(None)));
        assert_eq!(b2g.expectation(), Expectation::Clean);

        let g2b1 = classify_function(&case, "goodG2B1");
        assert_eq!(g2b1.role, FunctionRole::Good(GoodKind::G2B(Some(1))));
        assert_eq!(g2b1.part, FunctionPart::Whole);

        let source = classify_function(&case, "CWE191_Integer_Underflow__int_fgets_postdec_63_goodG2B2Source");
        assert_eq!(source.role, FunctionRole::Good(GoodKind::G2B(Some(2))));
        assert_eq!(source.part, FunctionPart::Source);

        assert_eq!(
            classify_function(&case, "good1").role,
            FunctionRole::Good(GoodKind::Numbered(1))
        );
        assert_eq!(
            classify_function(&case, "CWE191_Integer_Underflow__int_fgets_postdec_63_good").role,
            FunctionRole::Good(GoodKind::Entry)
        );
        assert_eq!(classify_function(&case, "main").role, FunctionRole::Neutral);
        assert_eq!(
            classify_function(&case, "printIntLine").expectation(),
            Expectation::Ignored
        );
    }

    #[test]
    fn role_display_matches_juliet_spelling() {
        assert_eq!(FunctionRole::Good(GoodKind::G2B(Some(2))).to_string(), "goodG2B2");
        assert_eq!(FunctionRole::Good(GoodKind::B2G(None)).to_string(), "goodB2G");
        assert_eq!(FunctionRole::Good(GoodKind::Numbered(1)).to_string(), "good1");
    }
}
