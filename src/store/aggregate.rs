//! Seasonal aggregation of stored pasture statistics.
//!
//! Rows are grouped per (ranch, pasture, model) and each biomass measure is
//! reduced with an [`AggFunc`], skipping rejected (null) values. Date windows
//! are exclusive on both ends.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::core::statistics;
use crate::store::record::{PastureStatRecord, MEASURES};
use crate::types::{RangesatError, RangesatResult};

/// Reduction applied to each measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggFunc {
    Mean,
    Median,
    Sum,
    Count,
    Max,
    Min,
    StdDev,
}

impl AggFunc {
    pub const ALL: [AggFunc; 7] = [
        AggFunc::Mean,
        AggFunc::Median,
        AggFunc::Sum,
        AggFunc::Count,
        AggFunc::Max,
        AggFunc::Min,
        AggFunc::StdDev,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Mean => "mean",
            AggFunc::Median => "median",
            AggFunc::Sum => "sum",
            AggFunc::Count => "count",
            AggFunc::Max => "max",
            AggFunc::Min => "min",
            AggFunc::StdDev => "std",
        }
    }

    /// `None` for an empty input, except `Count` which is 0
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        match self {
            AggFunc::Count => Some(values.len() as f64),
            _ if values.is_empty() => None,
            AggFunc::Mean => statistics::mean(values),
            AggFunc::Median => statistics::quantile(values, 0.5),
            AggFunc::Sum => Some(values.iter().sum()),
            AggFunc::Max => values.iter().copied().reduce(f64::max),
            AggFunc::Min => values.iter().copied().reduce(f64::min),
            AggFunc::StdDev => statistics::std_dev(values),
        }
    }
}

impl std::fmt::Display for AggFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggFunc {
    type Err = RangesatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "avg" => Ok(AggFunc::Mean),
            "median" => Ok(AggFunc::Median),
            "sum" => Ok(AggFunc::Sum),
            "count" => Ok(AggFunc::Count),
            "max" => Ok(AggFunc::Max),
            "min" => Ok(AggFunc::Min),
            "std" | "stddev" | "sd" => Ok(AggFunc::StdDev),
            other => Err(RangesatError::Configuration(format!(
                "unknown aggregation function '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for AggFunc {
    type Error = RangesatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AggFunc> for String {
    fn from(value: AggFunc) -> Self {
        value.name().to_string()
    }
}

/// Calendar day without a year, `MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> RangesatResult<Self> {
        // validated against a leap year so 02-29 is accepted
        NaiveDate::from_ymd_opt(2000, month, day)
            .map(|_| Self { month, day })
            .ok_or_else(|| RangesatError::Configuration(format!("invalid month-day {:02}-{:02}", month, day)))
    }

    pub fn in_year(&self, year: i32) -> RangesatResult<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day).ok_or_else(|| {
            RangesatError::Configuration(format!("{:02}-{:02} does not exist in {}", self.month, self.day, year))
        })
    }
}

impl FromStr for MonthDay {
    type Err = RangesatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RangesatError::Configuration(format!("expected MM-DD, got '{}'", s));
        let (month, day) = s.trim().split_once('-').ok_or_else(invalid)?;
        let month = month.parse().map_err(|_| invalid())?;
        let day = day.parse().map_err(|_| invalid())?;
        MonthDay::new(month, day)
    }
}

impl std::fmt::Display for MonthDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

/// Aggregated measures of one pasture and model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastureAggregate {
    pub ranch: String,
    pub pasture: String,
    pub model: String,
    /// Set by [`multiyear`]
    pub year: Option<i32>,
    /// Rows in the group, accepted or not
    pub n_scenes: usize,
    pub biomass_mean_gpm: Option<f64>,
    pub biomass_ci90_gpm: Option<f64>,
    pub biomass_10pct_gpm: Option<f64>,
    pub biomass_75pct_gpm: Option<f64>,
    pub biomass_90pct_gpm: Option<f64>,
    pub biomass_total_kg: Option<f64>,
    pub biomass_sd_gpm: Option<f64>,
    pub summer_vi_mean_gpm: Option<f64>,
    pub fall_vi_mean_gpm: Option<f64>,
}

type GroupKey = (String, String, String);

fn group_key(row: &PastureStatRecord) -> GroupKey {
    (row.ranch.clone(), row.pasture.clone(), row.model.clone())
}

fn reduce(key: &GroupKey, year: Option<i32>, rows: &[&PastureStatRecord], agg: AggFunc) -> PastureAggregate {
    let measure = |name: &str| {
        let values: Vec<f64> = rows.iter().filter_map(|r| r.measure(name)).collect();
        agg.apply(&values)
    };
    let [mean, ci90, p10, p75, p90, total, sd, summer, fall] = MEASURES.map(measure);
    PastureAggregate {
        ranch: key.0.clone(),
        pasture: key.1.clone(),
        model: key.2.clone(),
        year,
        n_scenes: rows.len(),
        biomass_mean_gpm: mean,
        biomass_ci90_gpm: ci90,
        biomass_10pct_gpm: p10,
        biomass_75pct_gpm: p75,
        biomass_90pct_gpm: p90,
        biomass_total_kg: total,
        biomass_sd_gpm: sd,
        summer_vi_mean_gpm: summer,
        fall_vi_mean_gpm: fall,
    }
}

fn grouped<'a, I>(rows: I) -> BTreeMap<GroupKey, Vec<&'a PastureStatRecord>>
where
    I: IntoIterator<Item = &'a PastureStatRecord>,
{
    let mut groups: BTreeMap<GroupKey, Vec<&PastureStatRecord>> = BTreeMap::new();
    for row in rows {
        groups.entry(group_key(row)).or_default().push(row);
    }
    groups
}

fn within(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    start < date && date < end
}

/// One aggregate per pasture and model over every row
pub fn aggregate_by_pasture(rows: &[PastureStatRecord], agg: AggFunc) -> Vec<PastureAggregate> {
    grouped(rows)
        .iter()
        .map(|(key, group)| reduce(key, None, group, agg))
        .collect()
}

/// Aggregate rows acquired strictly between `start` and `end` of `year`
pub fn intrayear(
    rows: &[PastureStatRecord],
    year: i32,
    start: MonthDay,
    end: MonthDay,
    agg: AggFunc,
) -> RangesatResult<Vec<PastureAggregate>> {
    let (first, last) = (start.in_year(year)?, end.in_year(year)?);
    let selected = rows.iter().filter(|r| within(r.acquisition_date, first, last));
    Ok(grouped(selected)
        .iter()
        .map(|(key, group)| reduce(key, None, group, agg))
        .collect())
}

/// Aggregate the seasonal window of every year strictly between
/// `start_year` and `end_year` into one value per pasture
pub fn interyear(
    rows: &[PastureStatRecord],
    start_year: i32,
    end_year: i32,
    start: MonthDay,
    end: MonthDay,
    agg: AggFunc,
) -> RangesatResult<Vec<PastureAggregate>> {
    let mut selected = Vec::new();
    for row in rows {
        let year = row.acquisition_date.year();
        if start_year < year && year < end_year && within(row.acquisition_date, start.in_year(year)?, end.in_year(year)?) {
            selected.push(row);
        }
    }
    Ok(grouped(selected)
        .iter()
        .map(|(key, group)| reduce(key, None, group, agg))
        .collect())
}

/// One aggregate per pasture, model and year in `start_year..=end_year`.
/// Pastures without rows in a year still appear, with null measures.
pub fn multiyear(
    rows: &[PastureStatRecord],
    start_year: i32,
    end_year: i32,
    start: MonthDay,
    end: MonthDay,
    agg: AggFunc,
) -> RangesatResult<Vec<PastureAggregate>> {
    let keys: BTreeSet<GroupKey> = rows.iter().map(group_key).collect();
    let mut out = Vec::new();
    for year in start_year..=end_year {
        let (first, last) = (start.in_year(year)?, end.in_year(year)?);
        let groups = grouped(rows.iter().filter(|r| within(r.acquisition_date, first, last)));
        for key in &keys {
            let group = groups.get(key).map(Vec::as_slice).unwrap_or(&[]);
            out.push(reduce(key, Some(year), group, agg));
        }
    }
    out.sort_by(|a, b| {
        (&a.ranch, &a.pasture, a.year, &a.model).cmp(&(&b.ranch, &b.pasture, b.year, &b.model))
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record::fixtures::record;
    use approx::assert_relative_eq;

    fn md(s: &str) -> MonthDay {
        s.parse().unwrap()
    }

    fn rows() -> Vec<PastureStatRecord> {
        vec![
            record("Ranch A", "North", "herb", (2015, 5, 1), Some(100.0)),
            record("Ranch A", "North", "herb", (2015, 6, 15), Some(200.0)),
            record("Ranch A", "North", "herb", (2015, 9, 30), Some(400.0)),
            record("Ranch A", "North", "herb", (2016, 6, 15), None),
            record("Ranch A", "North", "herb", (2017, 6, 15), Some(300.0)),
            record("Ranch B", "East", "herb", (2015, 6, 15), Some(50.0)),
        ]
    }

    #[test]
    fn test_agg_func_string_round_trip() {
        for agg in AggFunc::ALL {
            assert_eq!(agg.to_string().parse::<AggFunc>().unwrap(), agg);
            let yaml = serde_yaml::to_string(&agg).unwrap();
            assert_eq!(serde_yaml::from_str::<AggFunc>(&yaml).unwrap(), agg);
        }
        assert_eq!("StdDev".parse::<AggFunc>().unwrap(), AggFunc::StdDev);
        assert!("mode".parse::<AggFunc>().is_err());
    }

    #[test]
    fn test_agg_func_values() {
        let v = [1.0, 2.0, 3.0, 10.0];
        assert_eq!(AggFunc::Mean.apply(&v), Some(4.0));
        assert_eq!(AggFunc::Median.apply(&v), Some(2.5));
        assert_eq!(AggFunc::Sum.apply(&v), Some(16.0));
        assert_eq!(AggFunc::Count.apply(&v), Some(4.0));
        assert_eq!(AggFunc::Max.apply(&v), Some(10.0));
        assert_eq!(AggFunc::Min.apply(&v), Some(1.0));
        assert_relative_eq!(AggFunc::StdDev.apply(&v).unwrap(), 12.5f64.sqrt(), epsilon = 1e-12);
        assert_eq!(AggFunc::Mean.apply(&[]), None);
        assert_eq!(AggFunc::Count.apply(&[]), Some(0.0));
    }

    #[test]
    fn test_month_day_parsing() {
        assert_eq!(md("05-01"), MonthDay { month: 5, day: 1 });
        assert_eq!(md("02-29").to_string(), "02-29");
        assert!("13-01".parse::<MonthDay>().is_err());
        assert!("0501".parse::<MonthDay>().is_err());
        assert!(md("02-29").in_year(2015).is_err());
    }

    #[test]
    fn test_aggregate_by_pasture_skips_nulls() {
        let out = aggregate_by_pasture(&rows(), AggFunc::Mean);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].ranch.as_str(), out[0].pasture.as_str()), ("Ranch A", "North"));
        assert_eq!(out[0].n_scenes, 5);
        assert_eq!(out[0].biomass_mean_gpm, Some(250.0));
        assert_eq!(out[1].biomass_mean_gpm, Some(50.0));
    }

    #[test]
    fn test_intrayear_window_is_exclusive() {
        let out = intrayear(&rows(), 2015, md("05-01"), md("09-30"), AggFunc::Mean).unwrap();
        let north = out.iter().find(|a| a.pasture == "North").unwrap();
        // 05-01 and 09-30 fall on the window edges
        assert_eq!(north.n_scenes, 1);
        assert_eq!(north.biomass_mean_gpm, Some(200.0));

        let wide = intrayear(&rows(), 2015, md("04-30"), md("10-01"), AggFunc::Count).unwrap();
        let north = wide.iter().find(|a| a.pasture == "North").unwrap();
        assert_eq!(north.biomass_mean_gpm, Some(3.0));
    }

    #[test]
    fn test_interyear_excludes_boundary_years() {
        let out = interyear(&rows(), 2015, 2018, md("06-01"), md("07-01"), AggFunc::Max).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].n_scenes, 2);
        assert_eq!(out[0].biomass_mean_gpm, Some(300.0));
    }

    #[test]
    fn test_multiyear_lists_every_year_sorted() {
        let out = multiyear(&rows(), 2015, 2017, md("06-01"), md("07-01"), AggFunc::Mean).unwrap();
        assert_eq!(out.len(), 6);
        let keys: Vec<(&str, Option<i32>)> = out.iter().map(|a| (a.ranch.as_str(), a.year)).collect();
        assert_eq!(
            keys,
            vec![
                ("Ranch A", Some(2015)),
                ("Ranch A", Some(2016)),
                ("Ranch A", Some(2017)),
                ("Ranch B", Some(2015)),
                ("Ranch B", Some(2016)),
                ("Ranch B", Some(2017)),
            ]
        );
        assert_eq!(out[0].biomass_mean_gpm, Some(200.0));
        assert_eq!(out[1].biomass_mean_gpm, None);
        assert_eq!(out[1].n_scenes, 1);
        assert_eq!(out[4].n_scenes, 0);
    }
}
