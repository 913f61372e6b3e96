//! Query parameters: the typed parameter table and `QuerySpec` parsing.
//!
//! Parsing is a pure step from raw `(name, value)` pairs (query string or
//! form body alike) to a validated [`QuerySpec`]. Nothing here touches the
//! index.

use crate::access::Requester;
use crate::codec::OutputFormat;
use crate::core::temporal::{TimeWindow, Timestamp};
use crate::error::{Error, Result};
use crate::query::pattern::{FieldSelector, Selectors};

/// Query parameters understood by the dataselect query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    StartTime,
    EndTime,
    Network,
    Station,
    Location,
    Channel,
    Format,
    NoData,
}

/// How a parameter's value is validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// FDSN time string
    Time,
    /// Comma-separated wildcard list
    PatternList,
    /// One of a fixed set of values
    OneOf(&'static [&'static str]),
}

/// One row of the parameter table
#[derive(Debug, Clone, Copy)]
pub struct ParameterSpec {
    pub param: Param,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub rule: Rule,
    /// Reason reported when a required parameter is absent
    pub missing: Option<&'static str>,
}

impl ParameterSpec {
    fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.aliases.contains(&key)
    }
}

/// The dataselect parameter table
pub const PARAMETERS: [ParameterSpec; 8] = [
    ParameterSpec {
        param: Param::StartTime,
        name: "starttime",
        aliases: &["start"],
        rule: Rule::Time,
        missing: Some("Start time must be specified."),
    },
    ParameterSpec {
        param: Param::EndTime,
        name: "endtime",
        aliases: &["end"],
        rule: Rule::Time,
        missing: Some("End time must be specified."),
    },
    ParameterSpec {
        param: Param::Network,
        name: "network",
        aliases: &["net"],
        rule: Rule::PatternList,
        missing: None,
    },
    ParameterSpec {
        param: Param::Station,
        name: "station",
        aliases: &["sta"],
        rule: Rule::PatternList,
        missing: None,
    },
    ParameterSpec {
        param: Param::Location,
        name: "location",
        aliases: &["loc"],
        rule: Rule::PatternList,
        missing: None,
    },
    ParameterSpec {
        param: Param::Channel,
        name: "channel",
        aliases: &["cha"],
        rule: Rule::PatternList,
        missing: None,
    },
    ParameterSpec {
        param: Param::Format,
        name: "format",
        aliases: &[],
        rule: Rule::OneOf(&["mseed", "miniseed", "json"]),
        missing: None,
    },
    ParameterSpec {
        param: Param::NoData,
        name: "nodata",
        aliases: &[],
        rule: Rule::OneOf(&["204", "404"]),
        missing: None,
    },
];

/// Look up the table row answering to `key` (case-insensitive)
pub fn lookup(key: &str) -> Option<&'static ParameterSpec> {
    let key = key.to_ascii_lowercase();
    PARAMETERS.iter().find(|spec| spec.answers_to(&key))
}

/// Status reported when a query selects nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoDataStatus {
    /// 204
    #[default]
    NoContent,
    /// 404
    NotFound,
}

impl NoDataStatus {
    pub fn code(&self) -> u16 {
        match self {
            NoDataStatus::NoContent => 204,
            NoDataStatus::NotFound => 404,
        }
    }
}

/// A validated query
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub window: TimeWindow,
    pub selectors: Selectors,
    pub format: OutputFormat,
    pub nodata: NoDataStatus,
    pub requester: Requester,
}

impl QuerySpec {
    /// Query over `window` selecting everything, anonymously
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            selectors: Selectors::all(),
            format: OutputFormat::default(),
            nodata: NoDataStatus::default(),
            requester: Requester::Anonymous,
        }
    }

    pub fn with_selectors(mut self, selectors: Selectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_nodata(mut self, nodata: NoDataStatus) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = requester;
        self
    }

    /// Parse and validate raw parameters.
    ///
    /// Every failure is an [`Error::Validation`] carrying the reason to show
    /// to the caller.
    pub fn parse<'a, I>(pairs: I, requester: Requester) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut values: [Option<&'a str>; PARAMETERS.len()] = [None; PARAMETERS.len()];

        for (key, value) in pairs {
            let index = PARAMETERS
                .iter()
                .position(|spec| spec.answers_to(&key.to_ascii_lowercase()))
                .ok_or_else(|| Error::Validation(format!("Unknown parameter '{}'.", key)))?;
            let spec = &PARAMETERS[index];
            if values[index].replace(value.trim()).is_some() {
                return Err(Error::Validation(format!(
                    "Parameter '{}' specified more than once.",
                    spec.name
                )));
            }
            if let Rule::OneOf(choices) = spec.rule {
                if !choices.contains(&value.trim().to_ascii_lowercase().as_str()) {
                    return Err(Error::Validation(choice_error(spec)));
                }
            }
        }

        let value_of = |param: Param| -> (Option<&'a str>, &'static ParameterSpec) {
            let index = PARAMETERS
                .iter()
                .position(|spec| spec.param == param)
                .unwrap_or_default();
            (values[index], &PARAMETERS[index])
        };

        let start = parse_time(value_of(Param::StartTime))?;
        let end = parse_time(value_of(Param::EndTime))?;
        let window = TimeWindow::new(start, end)
            .filter(|_| start < end)
            .ok_or_else(|| Error::Validation("Start time must be before end time.".to_string()))?;

        let selectors = Selectors {
            network: FieldSelector::parse_opt(value_of(Param::Network).0),
            station: FieldSelector::parse_opt(value_of(Param::Station).0),
            location: FieldSelector::parse_opt(value_of(Param::Location).0),
            channel: FieldSelector::parse_opt(value_of(Param::Channel).0),
        };

        let format = match value_of(Param::Format).0 {
            Some(raw) => OutputFormat::parse(raw)
                .ok_or_else(|| Error::Validation(choice_error(value_of(Param::Format).1)))?,
            None => OutputFormat::default(),
        };

        let nodata = match value_of(Param::NoData).0 {
            Some("404") => NoDataStatus::NotFound,
            _ => NoDataStatus::NoContent,
        };

        Ok(Self {
            window,
            selectors,
            format,
            nodata,
            requester,
        })
    }
}

fn choice_error(spec: &ParameterSpec) -> String {
    match spec.rule {
        Rule::OneOf(choices) => format!(
            "{} must be {}.",
            spec.name,
            choices
                .iter()
                .map(|c| format!("'{}'", c))
                .collect::<Vec<_>>()
                .join(" or ")
        ),
        _ => format!("Invalid value for {}.", spec.name),
    }
}

fn parse_time((value, spec): (Option<&str>, &ParameterSpec)) -> Result<Timestamp> {
    let missing = || {
        spec.missing
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} must be specified.", spec.name))
    };
    let value = value.ok_or_else(|| Error::Validation(missing()))?;
    Timestamp::parse(value).ok_or_else(|| {
        Error::Validation(format!("Error parsing {}: '{}'", spec.name, value))
    })
}
