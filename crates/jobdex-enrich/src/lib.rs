//! Text normalization and signal extraction for raw job postings.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use jobdex_core::{ContractType, ExperienceLevel, JobRecord, SalaryType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "jobdex-enrich";

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern for tag {tag}: {source}")]
    InvalidPattern {
        tag: String,
        #[source]
        source: regex::Error,
    },
}

// ---------------------------------------------------------------------------
// Text normalizer
// ---------------------------------------------------------------------------

/// Named HTML entities decoded in free text. Numeric (`&#NNN;`) and hex
/// (`&#xHH;`) references are handled separately.
const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", " "),
    ("ndash", "\u{2013}"),
    ("mdash", "\u{2014}"),
    ("hellip", "\u{2026}"),
    ("lsquo", "\u{2018}"),
    ("rsquo", "\u{2019}"),
    ("ldquo", "\u{201c}"),
    ("rdquo", "\u{201d}"),
    ("bull", "\u{2022}"),
    ("middot", "\u{00b7}"),
    ("copy", "\u{00a9}"),
    ("reg", "\u{00ae}"),
    ("trade", "\u{2122}"),
    ("euro", "\u{20ac}"),
    ("pound", "\u{00a3}"),
    ("yen", "\u{00a5}"),
    ("deg", "\u{00b0}"),
];

/// Legal-entity suffixes peeled from company names before dedup matching.
const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "llc", "gmbh", "ltd", "limited", "co", "corp", "corporation", "company", "group",
    "holdings", "technologies", "technology", "labs", "plc", "sa", "srl", "bv", "ag", "oy", "ab",
];

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static BLOCK_TAG_RE: OnceLock<Regex> = OnceLock::new();
static INLINE_TAG_RE: OnceLock<Regex> = OnceLock::new();

fn block_tag_re() -> &'static Regex {
    BLOCK_TAG_RE.get_or_init(|| {
        rx(r"(?i)<\s*/?\s*(?:p|br|div|li|h[1-6]|tr|ul|ol|table|section|article|blockquote)\b[^>]*>")
    })
}

fn inline_tag_re() -> &'static Regex {
    INLINE_TAG_RE.get_or_init(|| {
        rx(r"(?i)</?\s*(?:a|abbr|aside|b|body|button|code|col|dd|dl|dt|em|figcaption|figure|footer|head|header|hr|html|i|iframe|img|input|label|main|nav|option|pre|select|small|span|strike|strong|style|sub|sup|tbody|td|tfoot|th|thead|u)\b[^>]*>")
    })
}

/// Convert block-level tags to line breaks, then drop remaining markup.
///
/// Only real HTML tag names count as markup: angle-bracket text that is not a
/// tag, like a decoded `<T>` generic, passes through untouched.
pub fn strip_markup(text: &str) -> String {
    let with_breaks = block_tag_re().replace_all(text, "\n");
    inline_tag_re().replace_all(&with_breaks, "").into_owned()
}

fn decode_entities_once(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail[1..].find(';').filter(|end| *end > 0 && *end <= 10) {
            Some(end) => {
                let name = &tail[1..end + 1];
                match decode_entity_name(name) {
                    Some(decoded) => {
                        out.push_str(&decoded);
                        rest = &tail[end + 2..];
                    }
                    None => {
                        out.push('&');
                        rest = &tail[1..];
                    }
                }
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity_name(name: &str) -> Option<String> {
    if let Some(digits) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        let code = u32::from_str_radix(digits, 16).ok()?;
        return char::from_u32(code).map(String::from);
    }
    if let Some(digits) = name.strip_prefix('#') {
        let code: u32 = digits.parse().ok()?;
        return char::from_u32(code).map(String::from);
    }
    NAMED_ENTITIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, decoded)| (*decoded).to_string())
}

/// Decode HTML character references to a fixpoint, so decoding is idempotent.
///
/// Every successful substitution strictly shortens the string, so the loop
/// terminates.
pub fn decode_entities(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = decode_entities_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_text_once(text: &str) -> String {
    let stripped = strip_markup(text);
    let decoded = decode_entities(&stripped);
    decoded
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full cleaning for free text: markup to line breaks, entities decoded,
/// whitespace collapsed per line. Runs before signal extraction so patterns
/// see readable text.
///
/// Applied to a fixpoint: entity decoding can surface markup (`&lt;p&gt;`),
/// which the next pass then strips, so cleaning already-clean text changes
/// nothing. Every changing pass strictly shortens the string, so the loop
/// terminates.
pub fn clean_text(text: &str) -> String {
    let mut current = clean_text_once(text);
    loop {
        let next = clean_text_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Display cleaning: entities decoded and whitespace trimmed, nothing else.
pub fn clean_display(text: &str) -> String {
    collapse_whitespace(&decode_entities(text))
}

/// Matching-key normalization for company names: lowercase, iteratively peel
/// legal-entity suffixes, keep alphanumerics only.
pub fn normalize_company(name: &str) -> String {
    let mut words: Vec<String> = name
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    while words.len() > 1 {
        let last = words.last().map(String::as_str).unwrap_or_default();
        if LEGAL_SUFFIXES.contains(&last) {
            words.pop();
        } else {
            break;
        }
    }
    words.concat()
}

/// Matching-key normalization for titles: lowercase, punctuation to spaces,
/// whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let replaced: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_whitespace(&replaced)
}

// ---------------------------------------------------------------------------
// Pattern tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThousandsStyle {
    /// `120,000` — commas as thousands separators, dot as decimal point.
    Comma,
    /// `120.000` — European dot-separated thousands.
    Dot,
}

#[derive(Debug, Clone)]
struct SalaryPattern {
    regex: Regex,
    currency: &'static str,
    salary_type: SalaryType,
    thousands: ThousandsStyle,
}

/// Compiled detection tables, injected into the extractor. Tables iterate in
/// a stable order; adding an entry never affects existing tags.
#[derive(Debug, Clone)]
pub struct PatternTables {
    tech: Vec<(String, Regex)>,
    experience: Vec<(ExperienceLevel, Regex)>,
    contract: Vec<(ContractType, Regex)>,
    salary: Vec<SalaryPattern>,
}

/// Technology keyword table. Word boundaries keep neighboring terms apart:
/// `\bjava\b` cannot fire inside "javascript".
const TECH_PATTERNS: &[(&str, &str)] = &[
    // Languages
    ("python", r"\bpython\b"),
    ("javascript", r"\bjavascript\b|\bnode\.?js\b"),
    ("typescript", r"\btypescript\b"),
    ("java", r"\bjava\b"),
    ("go", r"\bgolang\b|\bgo\b"),
    ("rust", r"\brust\b"),
    ("c++", r"c\+\+"),
    ("c#", r"c#|\bcsharp\b|\.net\b"),
    ("ruby", r"\bruby\b"),
    ("php", r"\bphp\b"),
    ("swift", r"\bswift\b"),
    ("kotlin", r"\bkotlin\b"),
    ("scala", r"\bscala\b"),
    ("elixir", r"\belixir\b"),
    ("haskell", r"\bhaskell\b"),
    ("clojure", r"\bclojure\b"),
    ("dart", r"\bdart\b"),
    // Frameworks / web
    ("react", r"\breact(?:\.?js)?\b"),
    ("angular", r"\bangular(?:\.?js)?\b"),
    ("vue", r"\bvue(?:\.?js)?\b"),
    ("svelte", r"\bsvelte(?:kit)?\b"),
    ("nextjs", r"\bnext\.?js\b"),
    ("nodejs", r"\bnode(?:\.?js)?\b"),
    ("django", r"\bdjango\b"),
    ("flask", r"\bflask\b"),
    ("fastapi", r"\bfastapi\b"),
    ("rails", r"\b(?:ruby\s+on\s+)?rails\b"),
    ("laravel", r"\blaravel\b"),
    ("spring", r"\bspring(?:\s+boot)?\b"),
    ("express", r"\bexpress\.?js\b"),
    ("graphql", r"\bgraphql\b"),
    ("grpc", r"\bgrpc\b"),
    // Databases
    ("postgresql", r"\bpostgres(?:ql)?\b"),
    ("mysql", r"\bmysql\b"),
    ("mariadb", r"\bmariadb\b"),
    ("mongodb", r"\bmongo(?:db)?\b"),
    ("redis", r"\bredis\b"),
    ("elasticsearch", r"\belastic\s?search\b"),
    ("sqlite", r"\bsqlite\b"),
    ("cassandra", r"\bcassandra\b"),
    ("dynamodb", r"\bdynamodb\b"),
    ("clickhouse", r"\bclickhouse\b"),
    ("snowflake", r"\bsnowflake\b"),
    // Cloud / devops
    ("aws", r"\baws\b|\bamazon\s+web\s+services\b"),
    ("gcp", r"\bgcp\b|\bgoogle\s+cloud\b"),
    ("azure", r"\bazure\b"),
    ("kubernetes", r"\bkubernetes\b|\bk8s\b"),
    ("docker", r"\bdocker\b"),
    ("terraform", r"\bterraform\b"),
    ("ansible", r"\bansible\b"),
    ("jenkins", r"\bjenkins\b"),
    ("ci/cd", r"\bci/cd\b|\bcontinuous\s+integration\b"),
    ("github-actions", r"\bgithub\s+actions\b"),
    ("linux", r"\blinux\b"),
    ("nginx", r"\bnginx\b"),
    // AI / ML
    ("machine-learning", r"\bmachine\s+learning\b"),
    ("pytorch", r"\bpytorch\b"),
    ("tensorflow", r"\btensorflow\b"),
    ("llm", r"\bllms?\b|\blarge\s+language\s+models?\b"),
    ("openai", r"\bopenai\b|\bgpt-?[45o]?\b"),
    ("langchain", r"\blangchain\b"),
    ("huggingface", r"\bhugging\s?face\b"),
    ("nlp", r"\bnlp\b|\bnatural\s+language\s+processing\b"),
    ("computer-vision", r"\bcomputer\s+vision\b"),
    // Mobile
    ("ios", r"\bios\b"),
    ("android", r"\bandroid\b"),
    ("react-native", r"\breact\s+native\b"),
    ("flutter", r"\bflutter\b"),
    // Web3
    ("blockchain", r"\bblockchain\b"),
    ("solidity", r"\bsolidity\b"),
    ("ethereum", r"\bethereum\b"),
    ("web3", r"\bweb3\b"),
    ("solana", r"\bsolana\b"),
    ("smart-contracts", r"\bsmart\s+contracts?\b"),
    // Messaging
    ("kafka", r"\bkafka\b"),
    ("rabbitmq", r"\brabbitmq\b"),
    ("sqs", r"\bsqs\b"),
    ("nats", r"\bnats\b"),
    ("mqtt", r"\bmqtt\b"),
    // Testing
    ("cypress", r"\bcypress\b"),
    ("selenium", r"\bselenium\b"),
    ("playwright", r"\bplaywright\b"),
    ("jest", r"\bjest\b"),
    ("pytest", r"\bpytest\b"),
    // Misc ecosystem
    ("rest-api", r"\brest(?:ful)?\s+apis?\b"),
    ("microservices", r"\bmicroservices?\b"),
    ("devops", r"\bdevops\b"),
    ("sre", r"\bsre\b|\bsite\s+reliability\b"),
];

/// Experience patterns, listed highest seniority first. Evaluated in order;
/// a senior posting mentioning "3-5 years" must still classify as senior.
const EXPERIENCE_PATTERNS: &[(ExperienceLevel, &str)] = &[
    (
        ExperienceLevel::Lead,
        r"(?i)\blead\b|\bprincipal\b|\bstaff\s+(?:engineer|developer)\b|\bhead\s+of\b|\barchitect\b|\bdirector\b|\bvp\b|\bvice\s+president\b|\bcto\b|\bengineering\s+manager\b",
    ),
    (
        ExperienceLevel::Senior,
        // The years alternative must not fire on the upper bound of a lower
        // range like "3-5 years", hence the consumed non-digit/dash guard.
        r"(?i)\bsenior\b|\bsr\b\.?|(?:^|[^0-9-])(?:[5-9]|1[0-9])(?:\s*-\s*[0-9]+)?\s*\+?\s*years?\b",
    ),
    (
        ExperienceLevel::Mid,
        r"(?i)\bmid[-\s]?level\b|\bintermediate\b|\b[2-4](?:\s*-\s*[0-9]+)?\s*\+?\s*years?\b",
    ),
    (
        ExperienceLevel::Junior,
        r"(?i)\bjunior\b|\bjr\b\.?|\bentry[-\s]?level\b|\bgraduate\b|\bintern(?:ship)?\b|\bno\s+experience\b|\b[01](?:\s*-\s*[0-9]+)?\s*years?\b",
    ),
];

/// Contract patterns, most contractor-like first so specific signals beat
/// boilerplate "full-time" mentions.
const CONTRACT_PATTERNS: &[(ContractType, &str)] = &[
    (
        ContractType::Freelance,
        r"(?i)\bfreelance\w*\b|\bself[-\s]?employed\b",
    ),
    (
        ContractType::Contract,
        r"(?i)\bcontract(?:or|ing)?\b|\bb2b\b|\bc2c\b|\btemporary\b|\binterim\b",
    ),
    (ContractType::PartTime, r"(?i)\bpart[-\s]?time\b"),
    (
        ContractType::FullTime,
        r"(?i)\bfull[-\s]?time\b|\bpermanent\b|\bfte\b",
    ),
];

impl Default for PatternTables {
    fn default() -> Self {
        let tech = TECH_PATTERNS
            .iter()
            .map(|(tag, pattern)| ((*tag).to_string(), rx(&format!("(?i){pattern}"))))
            .collect();
        let experience = EXPERIENCE_PATTERNS
            .iter()
            .map(|(level, pattern)| (*level, rx(pattern)))
            .collect();
        let contract = CONTRACT_PATTERNS
            .iter()
            .map(|(kind, pattern)| (*kind, rx(pattern)))
            .collect();
        let salary = vec![
            // $100k - $150k, $90,000 to $120,000
            SalaryPattern {
                regex: rx(
                    r"(?i)\$\s*(?P<min>[0-9][0-9,]*(?:\.[0-9]+)?)\s*(?P<mink>k)?\s*(?:-|–|—|to)\s*\$?\s*(?P<max>[0-9][0-9,]*(?:\.[0-9]+)?)\s*(?P<maxk>k)?",
                ),
                currency: "USD",
                salary_type: SalaryType::Yearly,
                thousands: ThousandsStyle::Comma,
            },
            // $120k+
            SalaryPattern {
                regex: rx(r"(?i)\$\s*(?P<min>[0-9][0-9,]*)\s*(?P<mink>k)?\s*\+"),
                currency: "USD",
                salary_type: SalaryType::Yearly,
                thousands: ThousandsStyle::Comma,
            },
            // EUR 80.000 - 120.000, €60.000-90.000
            SalaryPattern {
                regex: rx(
                    r"(?i)(?:€|eur)\s*(?P<min>[0-9]{1,3}(?:\.[0-9]{3})+|[0-9]+)(?P<mink>k)?\s*(?:-|–|—|to)\s*(?:€|eur)?\s*(?P<max>[0-9]{1,3}(?:\.[0-9]{3})+|[0-9]+)(?P<maxk>k)?",
                ),
                currency: "EUR",
                salary_type: SalaryType::Yearly,
                thousands: ThousandsStyle::Dot,
            },
            // £55k - £70k
            SalaryPattern {
                regex: rx(
                    r"(?i)£\s*(?P<min>[0-9][0-9,]*)\s*(?P<mink>k)?\s*(?:-|–|—|to)\s*£?\s*(?P<max>[0-9][0-9,]*)\s*(?P<maxk>k)?",
                ),
                currency: "GBP",
                salary_type: SalaryType::Yearly,
                thousands: ThousandsStyle::Comma,
            },
            // $50/hr, $45 per hour
            SalaryPattern {
                regex: rx(
                    r"(?i)\$\s*(?P<min>[0-9]+(?:\.[0-9]+)?)(?:\s*(?:-|–|to)\s*\$?\s*(?P<max>[0-9]+(?:\.[0-9]+)?))?\s*(?:/\s*(?:hr|hour)|per\s+hour|an\s+hour|hourly)",
                ),
                currency: "USD",
                salary_type: SalaryType::Hourly,
                thousands: ThousandsStyle::Comma,
            },
        ];
        Self {
            tech,
            experience,
            contract,
            salary,
        }
    }
}

impl PatternTables {
    /// Register an extra technology detector. Existing tags are unaffected.
    pub fn with_tech_entry(mut self, tag: &str, pattern: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(&format!("(?i){pattern}")).map_err(|source| {
            PatternError::InvalidPattern {
                tag: tag.to_string(),
                source,
            }
        })?;
        self.tech.push((tag.to_string(), regex));
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Signal extractor
// ---------------------------------------------------------------------------

/// Salary figures recovered from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalarySignal {
    pub min: f64,
    pub max: Option<f64>,
    pub currency: String,
    pub salary_type: SalaryType,
}

const MAX_PLAUSIBLE_SALARY: f64 = 10_000_000.0;

#[derive(Debug, Clone, Default)]
pub struct SignalExtractor {
    tables: PatternTables,
}

impl SignalExtractor {
    pub fn new(tables: PatternTables) -> Self {
        Self { tables }
    }

    /// All matching technology tags; no ranking, no cap.
    pub fn extract_tech_stack(&self, text: &str) -> BTreeSet<String> {
        self.tables
            .tech
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// First match in lead → senior → mid → junior order wins.
    pub fn detect_experience_level(&self, text: &str) -> Option<ExperienceLevel> {
        self.tables
            .experience
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(level, _)| *level)
    }

    /// First match in freelance → contract → part-time → full-time order wins.
    pub fn detect_contract_type(&self, text: &str) -> Option<ContractType> {
        self.tables
            .contract
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(kind, _)| *kind)
    }

    /// Ordered salary pattern scan; an implausible figure rejects only the
    /// current pattern and the scan continues.
    pub fn extract_salary(&self, text: &str) -> Option<SalarySignal> {
        for pattern in &self.tables.salary {
            let Some(captures) = pattern.regex.captures(text) else {
                continue;
            };
            let Some(min) = parse_amount(&captures, "min", "mink", pattern.thousands) else {
                continue;
            };
            let max = parse_amount(&captures, "max", "maxk", pattern.thousands);
            if !plausible(min) || max.is_some_and(|v| !plausible(v)) {
                debug!(min, ?max, "rejecting implausible salary figure");
                continue;
            }
            let (min, max) = match max {
                Some(max) if max < min => (max, Some(min)),
                other => (min, other),
            };
            return Some(SalarySignal {
                min,
                max,
                currency: pattern.currency.to_string(),
                salary_type: pattern.salary_type,
            });
        }
        None
    }
}

fn plausible(value: f64) -> bool {
    (0.0..=MAX_PLAUSIBLE_SALARY).contains(&value)
}

fn parse_amount(
    captures: &regex::Captures<'_>,
    group: &str,
    k_group: &str,
    thousands: ThousandsStyle,
) -> Option<f64> {
    let text = captures.name(group)?.as_str();
    let cleaned = match thousands {
        ThousandsStyle::Comma => text.replace(',', ""),
        ThousandsStyle::Dot => text.replace('.', ""),
    };
    let mut value: f64 = cleaned.parse().ok()?;
    // "k" shorthand expands only when the raw numeral is still below 1000,
    // so already-expanded figures stay untouched.
    if captures.name(k_group).is_some() && value < 1000.0 {
        value *= 1000.0;
    }
    Some(value)
}

// ---------------------------------------------------------------------------
// Record enricher
// ---------------------------------------------------------------------------

/// Fills missing structured fields from free text without ever overwriting a
/// value a source fetcher already provided. Idempotent per record.
#[derive(Debug, Clone, Default)]
pub struct Enricher {
    extractor: SignalExtractor,
}

impl Enricher {
    pub fn new(extractor: SignalExtractor) -> Self {
        Self { extractor }
    }

    pub fn enrich_record(&self, mut record: JobRecord) -> JobRecord {
        record.title = clean_display(&record.title);
        if record.title.is_empty() {
            warn!(id = %record.id, "record has no usable title");
        }
        record.company = record.company.map(|c| clean_display(&c));
        record.location = record.location.map(|l| clean_display(&l));
        record.description = record.description.map(|d| clean_text(&d));

        let haystack = match &record.description {
            Some(description) => format!("{}\n{}", record.title, description),
            None => record.title.clone(),
        };

        if record.tech_stack.is_empty() {
            record.tech_stack = self.extractor.extract_tech_stack(&haystack);
        }
        if record.experience_level.is_none() {
            record.experience_level = self.extractor.detect_experience_level(&haystack);
        }
        if record.contract_type.is_none() {
            record.contract_type = self.extractor.detect_contract_type(&haystack);
        }
        if record.salary_min.is_none() && record.salary_max.is_none() {
            if let Some(signal) = self.extractor.extract_salary(&haystack) {
                record.salary_min = Some(signal.min);
                record.salary_max = signal.max;
                if record.salary_currency.is_none() {
                    record.salary_currency = Some(signal.currency);
                }
                if record.salary_type.is_none() {
                    record.salary_type = Some(signal.salary_type);
                }
            }
        }
        record
    }

    pub fn enrich_batch(&self, records: Vec<JobRecord>) -> Vec<JobRecord> {
        let total = records.len();
        let enriched: Vec<JobRecord> = records
            .into_iter()
            .map(|record| self.enrich_record(record))
            .collect();
        debug!(total, "enriched batch");
        enriched
    }
}
