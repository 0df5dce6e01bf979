//! Policy condition evaluation.
//!
//! Conditions are checked in the fixed order the spec defines: time of day,
//! day of week, date range, IP ranges, then max TTL. A [`RequestContext`]
//! carries the ambient facts (timestamp, source IP, requested TTL) a
//! condition is evaluated against.

use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Facts about the request being evaluated, supplied by the caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// When the request is being evaluated.
    pub now: DateTime<Utc>,
    /// Source IP of the requesting entity, if known.
    pub source_ip: Option<IpAddr>,
    /// TTL requested for a dynamic credential, if this is such a request.
    pub requested_ttl_seconds: Option<u64>,
}

impl RequestContext {
    /// Builds a context for `now`, with no IP or TTL information.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            source_ip: None,
            requested_ttl_seconds: None,
        }
    }
}

/// The condition block attached to a policy statement. All present fields
/// must pass for the statement to match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    /// `"HH:MM-HH:MM"` UTC, may wrap across midnight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<String>,
    /// Three-letter lowercase weekday codes, e.g. `["mon", "tue"]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<String>>,
    /// `"YYYY-MM-DD/YYYY-MM-DD"`, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<String>,
    /// CIDR blocks the source IP must fall within one of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_ranges: Option<Vec<String>>,
    /// Maximum TTL, in seconds, a dynamic-credential request may ask for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ttl_seconds: Option<u64>,
}

/// The outcome of checking a single condition, for [`crate::simulate`]'s
/// step trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionStep {
    /// Name of the condition checked, e.g. `"time_of_day"`.
    pub step_name: String,
    /// Whether this condition passed.
    pub pass: bool,
    /// Human-readable detail.
    pub message: String,
}

/// Evaluates every present condition in fixed order, short-circuiting on
/// the first failure. Returns `true` iff all present conditions pass.
pub fn evaluate(conditions: &Conditions, ctx: &RequestContext) -> bool {
    trace(conditions, ctx).iter().all(|s| s.pass)
}

/// Evaluates every present condition in fixed order, never short-circuiting,
/// for use by `simulate`.
pub fn trace(conditions: &Conditions, ctx: &RequestContext) -> Vec<ConditionStep> {
    let mut steps = Vec::new();

    if let Some(spec) = &conditions.time_of_day {
        steps.push(check_time_of_day(spec, ctx));
    }
    if let Some(days) = &conditions.days_of_week {
        steps.push(check_days_of_week(days, ctx));
    }
    if let Some(spec) = &conditions.date_range {
        steps.push(check_date_range(spec, ctx));
    }
    if let Some(ranges) = &conditions.ip_ranges {
        steps.push(check_ip_ranges(ranges, ctx));
    }
    if let Some(cap) = conditions.max_ttl_seconds {
        steps.push(check_max_ttl(cap, ctx));
    }

    steps
}

fn check_time_of_day(spec: &str, ctx: &RequestContext) -> ConditionStep {
    let step_name = "time_of_day".to_string();
    let Some((start, end)) = parse_time_range(spec) else {
        return ConditionStep {
            step_name,
            pass: false,
            message: format!("malformed time_of_day spec: {spec}"),
        };
    };

    let now_minutes = ctx.now.hour() * 60 + ctx.now.minute();
    let pass = if start <= end {
        now_minutes >= start && now_minutes <= end
    } else {
        // wraps across midnight, e.g. 22:00-06:00
        now_minutes >= start || now_minutes <= end
    };

    ConditionStep {
        step_name,
        pass,
        message: format!("{spec} at minute {now_minutes} of day"),
    }
}

fn parse_time_range(spec: &str) -> Option<(u32, u32)> {
    let (start, end) = spec.split_once('-')?;
    Some((parse_hhmm(start)?, parse_hhmm(end)?))
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

fn check_days_of_week(days: &[String], ctx: &RequestContext) -> ConditionStep {
    let today = weekday_code(ctx.now.weekday());
    let pass = days.iter().any(|d| d.eq_ignore_ascii_case(today));
    ConditionStep {
        step_name: "days_of_week".to_string(),
        pass,
        message: format!("today is {today}"),
    }
}

fn weekday_code(weekday: chrono::Weekday) -> &'static str {
    match weekday {
        chrono::Weekday::Mon => "mon",
        chrono::Weekday::Tue => "tue",
        chrono::Weekday::Wed => "wed",
        chrono::Weekday::Thu => "thu",
        chrono::Weekday::Fri => "fri",
        chrono::Weekday::Sat => "sat",
        chrono::Weekday::Sun => "sun",
    }
}

fn check_date_range(spec: &str, ctx: &RequestContext) -> ConditionStep {
    let step_name = "date_range".to_string();
    let Some((from_str, to_str)) = spec.split_once('/') else {
        return ConditionStep {
            step_name,
            pass: false,
            message: format!("malformed date_range spec: {spec}"),
        };
    };

    let (from, to) = match (
        NaiveDate::parse_from_str(from_str, "%Y-%m-%d"),
        NaiveDate::parse_from_str(to_str, "%Y-%m-%d"),
    ) {
        (Ok(f), Ok(t)) => (f, t),
        _ => {
            return ConditionStep {
                step_name,
                pass: false,
                message: format!("malformed date_range spec: {spec}"),
            };
        }
    };

    let today = ctx.now.date_naive();
    let pass = today >= from && today <= to;
    ConditionStep {
        step_name,
        pass,
        message: format!("{today} within {spec}"),
    }
}

fn check_ip_ranges(ranges: &[String], ctx: &RequestContext) -> ConditionStep {
    let step_name = "ip_ranges".to_string();
    let Some(ip) = ctx.source_ip else {
        return ConditionStep {
            step_name,
            pass: false,
            message: "no source ip in request context".to_string(),
        };
    };

    let pass = ranges.iter().any(|cidr| {
        IpNet::from_str(cidr)
            .map(|net| net.contains(&ip))
            .unwrap_or(false)
    });

    ConditionStep {
        step_name,
        pass,
        message: format!("{ip} against {ranges:?}"),
    }
}

fn check_max_ttl(cap: u64, ctx: &RequestContext) -> ConditionStep {
    let step_name = "max_ttl_seconds".to_string();
    let Some(requested) = ctx.requested_ttl_seconds else {
        // Not a dynamic-credential request: the cap doesn't apply.
        return ConditionStep {
            step_name,
            pass: true,
            message: "no ttl requested, condition not applicable".to_string(),
        };
    };

    let pass = requested <= cap;
    ConditionStep {
        step_name,
        pass,
        message: format!("requested {requested}s against cap {cap}s"),
    }
}
