//! Python bindings (feature `python`)

use std::path::PathBuf;

use numpy::{IntoPyArray, PyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use serde::Serialize;

use crate::config::LocationConfig;
use crate::core::indices::SpectralIndex;
use crate::io::scene_reader::Scene;
use crate::pipeline::process_location;
use crate::store::aggregate::{self, AggFunc, MonthDay};
use crate::store::sqlite::{ResultStore, StatsFilter};
use crate::types::{RangesatError, DEFAULT_NODATA};

fn runtime_error(e: RangesatError) -> PyErr {
    match e {
        RangesatError::Configuration(msg) => PyErr::new::<PyValueError, _>(msg),
        other => PyErr::new::<PyRuntimeError, _>(format!("{}", other)),
    }
}

fn yaml_to_py(py: Python<'_>, value: &serde_yaml::Value) -> PyObject {
    use serde_yaml::Value;
    match value {
        Value::Null => py.None(),
        Value::Bool(b) => b.into_py(py),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into_py(py),
            None => n.as_f64().unwrap_or(f64::NAN).into_py(py),
        },
        Value::String(s) => s.into_py(py),
        other => format!("{:?}", other).into_py(py),
    }
}

/// Serialize rows into a list of dicts keyed by field name
fn rows_to_py<T: Serialize>(py: Python<'_>, rows: &[T]) -> PyResult<PyObject> {
    let list = PyList::empty(py);
    for row in rows {
        let value = serde_yaml::to_value(row)
            .map_err(|e| PyErr::new::<PyRuntimeError, _>(format!("{}", e)))?;
        let dict = PyDict::new(py);
        if let serde_yaml::Value::Mapping(map) = value {
            for (k, v) in &map {
                if let Some(key) = k.as_str() {
                    dict.set_item(key, yaml_to_py(py, v))?;
                }
            }
        }
        list.append(dict)?;
    }
    Ok(list.into_py(py))
}

/// Decoded Landsat scene
#[pyclass(name = "Scene")]
struct PyScene {
    inner: Scene,
}

#[pymethods]
impl PyScene {
    #[new]
    fn new(path: PathBuf) -> PyResult<Self> {
        let inner = Scene::open(&path).map_err(runtime_error)?;
        Ok(PyScene { inner })
    }

    #[getter]
    fn product_id(&self) -> String {
        self.inner.product_id().to_string()
    }

    #[getter]
    fn satellite(&self) -> u8 {
        self.inner.satellite().generation()
    }

    #[getter]
    fn acquisition_date(&self) -> String {
        self.inner.acquisition_date().to_string()
    }

    #[getter]
    fn shape(&self) -> (usize, usize) {
        self.inner.shape()
    }

    #[getter]
    fn bounds(&self) -> (f64, f64, f64, f64) {
        let b = self.inner.bounds();
        (b.left, b.bottom, b.right, b.top)
    }

    fn band_names(&self) -> Vec<String> {
        self.inner.band_names().into_iter().map(String::from).collect()
    }

    /// Spectral index grid with invalid cells as NaN
    fn index<'py>(&self, py: Python<'py>, name: &str) -> PyResult<&'py PyArray2<f64>> {
        let index: SpectralIndex = name.parse().map_err(runtime_error)?;
        let grid = self.inner.index(index).map_err(runtime_error)?;
        Ok(grid.filled(f64::NAN).into_pyarray(py))
    }

    #[pyo3(signature = (dst, gamma=None))]
    fn dump_rgb(&self, dst: PathBuf, gamma: Option<f64>) -> PyResult<()> {
        self.inner.dump_rgb(&dst, gamma).map_err(runtime_error)
    }

    #[pyo3(signature = (name, dst, nodata=DEFAULT_NODATA))]
    fn dump_index(&self, name: &str, dst: PathBuf, nodata: f64) -> PyResult<()> {
        let index: SpectralIndex = name.parse().map_err(runtime_error)?;
        let grid = self.inner.index(index).map_err(runtime_error)?;
        self.inner.dump(&grid, &dst, nodata).map_err(runtime_error)
    }

    fn __repr__(&self) -> String {
        let (rows, cols) = self.inner.shape();
        format!("Scene('{}', {}x{})", self.inner.product_id(), rows, cols)
    }
}

/// Process every scene of a location; returns the batch counts
#[pyfunction]
#[pyo3(signature = (config_path, overwrite=false))]
fn process(py: Python<'_>, config_path: PathBuf, overwrite: bool) -> PyResult<PyObject> {
    let config = LocationConfig::load(&config_path).map_err(runtime_error)?;
    let report = py
        .allow_threads(|| process_location(&config, overwrite))
        .map_err(runtime_error)?;
    let dict = PyDict::new(py);
    dict.set_item("processed", report.processed.len())?;
    dict.set_item("skipped", report.skipped.len())?;
    dict.set_item("failed", report.failed.len())?;
    Ok(dict.into_py(py))
}

/// Stored pasture statistics matching the filters
#[pyfunction]
#[pyo3(signature = (db_path, ranch=None, pasture=None, acquisition_date=None, year=None, model=None))]
fn query_pasture_stats(
    py: Python<'_>,
    db_path: PathBuf,
    ranch: Option<String>,
    pasture: Option<String>,
    acquisition_date: Option<String>,
    year: Option<i32>,
    model: Option<String>,
) -> PyResult<PyObject> {
    let acquisition_date = acquisition_date
        .map(|d| chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| PyErr::new::<PyValueError, _>(format!("{}", e)))?;
    let filter = StatsFilter {
        ranch,
        pasture,
        acquisition_date,
        year,
        model,
        ..Default::default()
    };
    let store = ResultStore::open(&db_path).map_err(runtime_error)?;
    let rows = store.query(&filter).map_err(runtime_error)?;
    rows_to_py(py, &rows)
}

/// Seasonal aggregate of one year (`year`) or of a year range (`start_year`, `end_year`)
#[pyfunction]
#[pyo3(signature = (db_path, start_date, end_date, year=None, start_year=None, end_year=None, agg_func="mean", ranch=None, pasture=None, multiyear=false))]
#[allow(clippy::too_many_arguments)]
fn aggregate_pasture_stats(
    py: Python<'_>,
    db_path: PathBuf,
    start_date: &str,
    end_date: &str,
    year: Option<i32>,
    start_year: Option<i32>,
    end_year: Option<i32>,
    agg_func: &str,
    ranch: Option<String>,
    pasture: Option<String>,
    multiyear: bool,
) -> PyResult<PyObject> {
    let agg: AggFunc = agg_func.parse().map_err(runtime_error)?;
    let start: MonthDay = start_date.parse().map_err(runtime_error)?;
    let end: MonthDay = end_date.parse().map_err(runtime_error)?;
    let filter = StatsFilter {
        ranch,
        pasture,
        ..Default::default()
    };
    let store = ResultStore::open(&db_path).map_err(runtime_error)?;
    let rows = store.query(&filter).map_err(runtime_error)?;

    let result = match (year, start_year, end_year) {
        (Some(y), _, _) => aggregate::intrayear(&rows, y, start, end, agg),
        (None, Some(a), Some(b)) if multiyear => aggregate::multiyear(&rows, a, b, start, end, agg),
        (None, Some(a), Some(b)) => aggregate::interyear(&rows, a, b, start, end, agg),
        _ => {
            return Err(PyErr::new::<PyValueError, _>(
                "either year or start_year and end_year is required",
            ))
        }
    }
    .map_err(runtime_error)?;
    rows_to_py(py, &result)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyScene>()?;
    m.add_function(wrap_pyfunction!(process, m)?)?;
    m.add_function(wrap_pyfunction!(query_pasture_stats, m)?)?;
    m.add_function(wrap_pyfunction!(aggregate_pasture_stats, m)?)?;
    Ok(())
}
