use std::path::Path;

use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};

use crate::io::parcels::normalize_name;
use crate::store::csv_store::{csv_header, read_records, scene_csv_files};
use crate::store::record::PastureStatRecord;
use crate::types::{RangesatError, RangesatResult, Satellite};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pasture_stats (
    product_id TEXT NOT NULL,
    key TEXT NOT NULL,
    pasture TEXT NOT NULL,
    ranch TEXT NOT NULL,
    model TEXT NOT NULL,
    total_px INTEGER NOT NULL,
    snow_px INTEGER NOT NULL,
    water_px INTEGER NOT NULL,
    aerosol_px INTEGER NOT NULL,
    valid_px INTEGER NOT NULL,
    coverage REAL NOT NULL,
    area_ha REAL NOT NULL,
    biomass_mean_gpm REAL,
    biomass_sd_gpm REAL,
    biomass_ci90_gpm REAL,
    biomass_10pct_gpm REAL,
    biomass_75pct_gpm REAL,
    biomass_90pct_gpm REAL,
    biomass_total_kg REAL,
    summer_vi_mean_gpm REAL,
    fall_vi_mean_gpm REAL,
    fraction_summer REAL,
    ndvi_mean REAL,
    ndvi_sd REAL,
    ndvi_10pct REAL,
    ndvi_75pct REAL,
    ndvi_90pct REAL,
    ndvi_ci90 REAL,
    nbr_mean REAL,
    nbr_sd REAL,
    nbr_10pct REAL,
    nbr_75pct REAL,
    nbr_90pct REAL,
    nbr_ci90 REAL,
    nbr2_mean REAL,
    nbr2_sd REAL,
    nbr2_10pct REAL,
    nbr2_75pct REAL,
    nbr2_90pct REAL,
    nbr2_ci90 REAL,
    satellite INTEGER NOT NULL,
    acquisition_date TEXT NOT NULL,
    wrs_path INTEGER NOT NULL,
    wrs_row INTEGER NOT NULL,
    bounds TEXT NOT NULL,
    wgs_bounds TEXT,
    valid_pastures_cnt INTEGER NOT NULL,
    UNIQUE (product_id, key, model)
);
CREATE INDEX IF NOT EXISTS pasture_stats_ranch ON pasture_stats (ranch, pasture);
CREATE INDEX IF NOT EXISTS pasture_stats_date ON pasture_stats (acquisition_date);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Row filter for [`ResultStore::query`]. Every set field must match.
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    /// Case-insensitive, `_` matches a space
    pub ranch: Option<String>,
    /// Case-insensitive, `_` matches a space
    pub pasture: Option<String>,
    pub acquisition_date: Option<NaiveDate>,
    /// Inclusive `(first, last)` acquisition dates
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub year: Option<i32>,
    pub model: Option<String>,
    pub product_id: Option<String>,
}

impl StatsFilter {
    pub fn ranch(mut self, ranch: &str) -> Self {
        self.ranch = Some(ranch.to_string());
        self
    }

    pub fn pasture(mut self, pasture: &str) -> Self {
        self.pasture = Some(pasture.to_string());
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(ranch) = &self.ranch {
            clauses.push("lower(replace(ranch, '_', ' ')) = ?");
            values.push(Value::Text(normalize_name(ranch)));
        }
        if let Some(pasture) = &self.pasture {
            clauses.push("lower(replace(pasture, '_', ' ')) = ?");
            values.push(Value::Text(normalize_name(pasture)));
        }
        if let Some(date) = self.acquisition_date {
            clauses.push("acquisition_date = ?");
            values.push(Value::Text(date.format(DATE_FORMAT).to_string()));
        }
        if let Some((first, last)) = self.date_range {
            clauses.push("acquisition_date BETWEEN ? AND ?");
            values.push(Value::Text(first.format(DATE_FORMAT).to_string()));
            values.push(Value::Text(last.format(DATE_FORMAT).to_string()));
        }
        if let Some(year) = self.year {
            clauses.push("substr(acquisition_date, 1, 4) = ?");
            values.push(Value::Text(format!("{:04}", year)));
        }
        if let Some(model) = &self.model {
            clauses.push("model = ?");
            values.push(Value::Text(model.clone()));
        }
        if let Some(product_id) = &self.product_id {
            clauses.push("product_id = ?");
            values.push(Value::Text(product_id.clone()));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// Embedded relational store of pasture statistics
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    pub fn open<P: AsRef<Path>>(path: P) -> RangesatResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        let store = Self { conn };
        store.init_schema()?;
        log::debug!("Opened result store {}", path.as_ref().display());
        Ok(store)
    }

    pub fn in_memory() -> RangesatResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> RangesatResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert records in one transaction. A row with the same
    /// (product_id, key, model) replaces the stored one.
    pub fn insert_records(&mut self, records: &[PastureStatRecord]) -> RangesatResult<usize> {
        let columns = csv_header();
        let sql = format!(
            "INSERT OR REPLACE INTO pasture_stats ({}) VALUES ({})",
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                stmt.execute(params_from_iter(record_values(record)))?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Merge every per-scene CSV in `dir`; returns the number of rows ingested
    pub fn ingest_csv_dir(&mut self, dir: &Path) -> RangesatResult<usize> {
        let files = scene_csv_files(dir)?;
        let mut total = 0;
        for file in &files {
            let records = read_records(file)?;
            total += self.insert_records(&records)?;
        }
        log::info!("Ingested {} rows from {} scene files in {}", total, files.len(), dir.display());
        Ok(total)
    }

    /// Matching rows ordered by acquisition date, ranch, pasture and model
    pub fn query(&self, filter: &StatsFilter) -> RangesatResult<Vec<PastureStatRecord>> {
        let (where_clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT {} FROM pasture_stats{} ORDER BY acquisition_date, ranch, pasture, model",
            csv_header().join(", "),
            where_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn count(&self) -> RangesatResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pasture_stats", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Distinct product ids, ascending
    pub fn product_ids(&self) -> RangesatResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT product_id FROM pasture_stats ORDER BY product_id")?;
        let ids = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for id in ids {
            out.push(id?);
        }
        Ok(out)
    }
}

fn real(v: Option<f64>) -> Value {
    v.map_or(Value::Null, Value::Real)
}

fn record_values(r: &PastureStatRecord) -> Vec<Value> {
    vec![
        Value::Text(r.product_id.clone()),
        Value::Text(r.key.clone()),
        Value::Text(r.pasture.clone()),
        Value::Text(r.ranch.clone()),
        Value::Text(r.model.clone()),
        Value::Integer(r.total_px as i64),
        Value::Integer(r.snow_px as i64),
        Value::Integer(r.water_px as i64),
        Value::Integer(r.aerosol_px as i64),
        Value::Integer(r.valid_px as i64),
        Value::Real(r.coverage),
        Value::Real(r.area_ha),
        real(r.biomass_mean_gpm),
        real(r.biomass_sd_gpm),
        real(r.biomass_ci90_gpm),
        real(r.biomass_10pct_gpm),
        real(r.biomass_75pct_gpm),
        real(r.biomass_90pct_gpm),
        real(r.biomass_total_kg),
        real(r.summer_vi_mean_gpm),
        real(r.fall_vi_mean_gpm),
        real(r.fraction_summer),
        real(r.ndvi_mean),
        real(r.ndvi_sd),
        real(r.ndvi_10pct),
        real(r.ndvi_75pct),
        real(r.ndvi_90pct),
        real(r.ndvi_ci90),
        real(r.nbr_mean),
        real(r.nbr_sd),
        real(r.nbr_10pct),
        real(r.nbr_75pct),
        real(r.nbr_90pct),
        real(r.nbr_ci90),
        real(r.nbr2_mean),
        real(r.nbr2_sd),
        real(r.nbr2_10pct),
        real(r.nbr2_75pct),
        real(r.nbr2_90pct),
        real(r.nbr2_ci90),
        Value::Integer(r.satellite.generation() as i64),
        Value::Text(r.acquisition_date.format(DATE_FORMAT).to_string()),
        Value::Integer(r.wrs_path as i64),
        Value::Integer(r.wrs_row as i64),
        Value::Text(r.bounds.clone()),
        r.wgs_bounds.clone().map_or(Value::Null, Value::Text),
        Value::Integer(r.valid_pastures_cnt as i64),
    ]
}

fn conversion_error(column: usize, err: RangesatError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn unsigned(row: &Row<'_>, column: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(column)?;
    Ok(v.max(0) as u64)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PastureStatRecord> {
    let generation: u8 = row.get(40)?;
    let satellite = Satellite::from_generation(generation).map_err(|e| conversion_error(40, e))?;
    let date: String = row.get(41)?;
    let acquisition_date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
        conversion_error(41, RangesatError::Processing(format!("bad acquisition date '{}': {}", date, e)))
    })?;

    Ok(PastureStatRecord {
        product_id: row.get(0)?,
        key: row.get(1)?,
        pasture: row.get(2)?,
        ranch: row.get(3)?,
        model: row.get(4)?,
        total_px: unsigned(row, 5)?,
        snow_px: unsigned(row, 6)?,
        water_px: unsigned(row, 7)?,
        aerosol_px: unsigned(row, 8)?,
        valid_px: unsigned(row, 9)?,
        coverage: row.get(10)?,
        area_ha: row.get(11)?,
        biomass_mean_gpm: row.get(12)?,
        biomass_sd_gpm: row.get(13)?,
        biomass_ci90_gpm: row.get(14)?,
        biomass_10pct_gpm: row.get(15)?,
        biomass_75pct_gpm: row.get(16)?,
        biomass_90pct_gpm: row.get(17)?,
        biomass_total_kg: row.get(18)?,
        summer_vi_mean_gpm: row.get(19)?,
        fall_vi_mean_gpm: row.get(20)?,
        fraction_summer: row.get(21)?,
        ndvi_mean: row.get(22)?,
        ndvi_sd: row.get(23)?,
        ndvi_10pct: row.get(24)?,
        ndvi_75pct: row.get(25)?,
        ndvi_90pct: row.get(26)?,
        ndvi_ci90: row.get(27)?,
        nbr_mean: row.get(28)?,
        nbr_sd: row.get(29)?,
        nbr_10pct: row.get(30)?,
        nbr_75pct: row.get(31)?,
        nbr_90pct: row.get(32)?,
        nbr_ci90: row.get(33)?,
        nbr2_mean: row.get(34)?,
        nbr2_sd: row.get(35)?,
        nbr2_10pct: row.get(36)?,
        nbr2_75pct: row.get(37)?,
        nbr2_90pct: row.get(38)?,
        nbr2_ci90: row.get(39)?,
        satellite,
        acquisition_date,
        wrs_path: row.get(42)?,
        wrs_row: row.get(43)?,
        bounds: row.get(44)?,
        wgs_bounds: row.get(45)?,
        valid_pastures_cnt: unsigned(row, 46)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::csv_store::write_scene_records;
    use crate::store::record::fixtures::record;

    fn populated() -> ResultStore {
        let mut store = ResultStore::in_memory().unwrap();
        store
            .insert_records(&[
                record("Ranch A", "North", "herb", (2015, 5, 10), Some(100.0)),
                record("Ranch A", "South Field", "herb", (2015, 5, 10), None),
                record("Ranch A", "North", "herb", (2016, 7, 1), Some(150.0)),
                record("Ranch B", "East", "herb", (2016, 7, 1), Some(80.0)),
                record("Ranch B", "East", "shrub", (2016, 7, 1), Some(60.0)),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_round_trip_preserves_nulls() {
        let store = populated();
        let rows = store.query(&StatsFilter::default().pasture("South Field")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], record("Ranch A", "South Field", "herb", (2015, 5, 10), None));
    }

    #[test]
    fn test_filter_by_ranch_and_pasture_is_case_and_underscore_insensitive() {
        let store = populated();
        let rows = store
            .query(&StatsFilter::default().ranch("ranch_a").pasture("SOUTH_FIELD"))
            .unwrap();
        assert_eq!(rows.len(), 1);

        let rows = store.query(&StatsFilter::default().ranch("Ranch_B")).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_filter_by_date_year_and_model() {
        let store = populated();
        let filter = StatsFilter {
            acquisition_date: NaiveDate::from_ymd_opt(2015, 5, 10),
            ..Default::default()
        };
        assert_eq!(store.query(&filter).unwrap().len(), 2);
        assert_eq!(store.query(&StatsFilter::default().year(2016)).unwrap().len(), 3);
        assert_eq!(
            store
                .query(&StatsFilter::default().year(2016).model("shrub"))
                .unwrap()
                .len(),
            1
        );

        let range = StatsFilter {
            date_range: Some((
                NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2015, 12, 31).unwrap(),
            )),
            ..Default::default()
        };
        assert_eq!(store.query(&range).unwrap().len(), 2);
    }

    #[test]
    fn test_reinsert_replaces_rows() {
        let mut store = populated();
        assert_eq!(store.count().unwrap(), 5);
        store
            .insert_records(&[record("Ranch A", "North", "herb", (2015, 5, 10), Some(999.0))])
            .unwrap();
        assert_eq!(store.count().unwrap(), 5);
        let rows = store
            .query(&StatsFilter::default().pasture("North").year(2015))
            .unwrap();
        assert_eq!(rows[0].biomass_mean_gpm, Some(999.0));
    }

    #[test]
    fn test_ingest_csv_dir_and_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let a = record("Ranch A", "North", "herb", (2015, 5, 10), Some(100.0));
        let b = record("Ranch A", "North", "herb", (2016, 7, 1), Some(150.0));
        write_scene_records(dir.path(), &a.product_id, &[a.clone()]).unwrap();
        write_scene_records(dir.path(), &b.product_id, &[b.clone()]).unwrap();

        let db = dir.path().join("sqlite3.db");
        {
            let mut store = ResultStore::open(&db).unwrap();
            assert_eq!(store.ingest_csv_dir(dir.path()).unwrap(), 2);
        }
        let store = ResultStore::open(&db).unwrap();
        assert_eq!(store.product_ids().unwrap(), vec![a.product_id.clone(), b.product_id.clone()]);
        assert_eq!(store.query(&StatsFilter::default()).unwrap(), vec![a, b]);
    }
}
