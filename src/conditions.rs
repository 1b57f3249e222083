//! Filter conditions for redemption queries.
//!
//! A [`ConditionSet`] is an immutable snapshot of what the caller asked for.
//! It is only ever built through [`ConditionSetBuilder`], which drops blank
//! input instead of rejecting it: an absent field means "no constraint".

use chrono::{Datelike, Duration, NaiveDate};
use clap::ValueEnum;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    fn from_bounds(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Option<Self> {
        let (start, end) = (start?, end?);
        if start > end {
            debug!("Ignoring date range with start {start} after end {end}");
            return None;
        }
        Some(Self { start, end })
    }
}

/// Relative calendar periods offered as shortcuts for date ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum DatePreset {
    Today,
    Last7Days,
    Last30Days,
    ThisMonth,
    LastMonth,
}

impl DatePreset {
    pub fn range(self, today: NaiveDate) -> DateRange {
        let (start, end) = match self {
            DatePreset::Today => (today, today),
            DatePreset::Last7Days => (today - Duration::days(6), today),
            DatePreset::Last30Days => (today - Duration::days(29), today),
            DatePreset::ThisMonth => {
                let first = first_of_month(today);
                (first, last_of_month(first))
            }
            DatePreset::LastMonth => {
                let previous = first_of_month(today) - Duration::days(1);
                (first_of_month(previous), previous)
            }
        };
        DateRange { start, end }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn last_of_month(first: NaiveDate) -> NaiveDate {
    let next_month = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    next_month.map_or(first, |next| next - Duration::days(1))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionSet {
    region: Option<String>,
    redeem_site: Option<String>,
    play_methods: Vec<String>,
    prize_conditions: Vec<(String, String)>,
    redeem_time: Option<DateRange>,
    sale_time: Option<DateRange>,
}

impl ConditionSet {
    pub fn builder() -> ConditionSetBuilder {
        ConditionSetBuilder::default()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn redeem_site(&self) -> Option<&str> {
        self.redeem_site.as_deref()
    }

    pub fn play_methods(&self) -> &[String] {
        &self.play_methods
    }

    /// Method to amount pairs in the order the methods were first given.
    pub fn prize_conditions(&self) -> &[(String, String)] {
        &self.prize_conditions
    }

    pub fn redeem_time(&self) -> Option<DateRange> {
        self.redeem_time
    }

    pub fn sale_time(&self) -> Option<DateRange> {
        self.sale_time
    }

    pub fn is_empty(&self) -> bool {
        self == &ConditionSet::default()
    }

    /// Short human summary used in log lines.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(region) = &self.region {
            parts.push(format!("region={region}"));
        }
        if let Some(site) = &self.redeem_site {
            parts.push(format!("redeem_site={site}"));
        }
        if !self.play_methods.is_empty() {
            parts.push(format!("play_methods=[{}]", self.play_methods.join(", ")));
        }
        for (method, amount) in &self.prize_conditions {
            parts.push(format!("prize[{method}]={amount}"));
        }
        if let Some(range) = self.redeem_time {
            parts.push(format!("redeem_time={}..{}", range.start, range.end));
        }
        if let Some(range) = self.sale_time {
            parts.push(format!("sale_time={}..{}", range.start, range.end));
        }
        if parts.is_empty() {
            "no conditions".to_string()
        } else {
            parts.join("; ")
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConditionSetBuilder {
    inner: ConditionSet,
}

fn non_blank(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ConditionSetBuilder {
    pub fn region(mut self, raw: &str) -> Self {
        self.inner.region = non_blank(raw);
        self
    }

    pub fn redeem_site(mut self, raw: &str) -> Self {
        self.inner.redeem_site = non_blank(raw);
        self
    }

    pub fn play_method(mut self, raw: &str) -> Self {
        if let Some(method) = non_blank(raw)
            && !self.inner.play_methods.contains(&method)
        {
            self.inner.play_methods.push(method);
        }
        self
    }

    pub fn play_methods<I, S>(self, raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .fold(self, |builder, method| builder.play_method(method.as_ref()))
    }

    /// Sets the target amount for one play method; a blank amount clears it.
    pub fn prize_condition(mut self, method: &str, amount: &str) -> Self {
        let Some(method) = non_blank(method) else {
            return self;
        };
        let pairs = &mut self.inner.prize_conditions;
        match (pairs.iter().position(|(m, _)| *m == method), non_blank(amount)) {
            (Some(idx), Some(amount)) => pairs[idx].1 = amount,
            (Some(idx), None) => {
                pairs.remove(idx);
            }
            (None, Some(amount)) => pairs.push((method, amount)),
            (None, None) => {}
        }
        self
    }

    pub fn redeem_time(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.inner.redeem_time = DateRange::from_bounds(start, end);
        self
    }

    pub fn sale_time(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.inner.sale_time = DateRange::from_bounds(start, end);
        self
    }

    pub fn build(self) -> ConditionSet {
        self.inner
    }
}
