//! Python bindings for host-side schedule preview.
//!
//! Built only with the `python` feature. The host computes coefficients in Python; this module
//! lets it check a control message and see exactly what every channel will be driven to before
//! anything is sent to the hardware.
//!
//! # Example (python)
//! ```python
//! from shimcompiler_backend import Schedule
//!
//! sched = Schedule()
//! sched.configure("c2|b2|l2|l3|r2|r1")
//! assert sched.transitions() == [4, 7]
//! sched.load_coefficients([float(v) for v in range(10)])
//! wave = sched.render_waveform(0, 7)   # numpy array, shape (2, 7)
//! ```

use numpy;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::coefficients::CoefficientStore;
use crate::indexer::ScheduleIndexer;
use crate::protocol::{parse_control_message, ScheduleConfig};
use crate::schedule::{Block, ScheduleLimits, ScheduleModel};

#[pyclass]
pub struct Schedule {
    model: ScheduleModel,
    store: Option<CoefficientStore>,
}

fn value_error(err: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(err.to_string())
}

#[pymethods]
impl Schedule {
    #[new]
    #[pyo3(signature = (max_blocks=9, max_channels=16, max_coefficients=8192))]
    pub fn new(max_blocks: usize, max_channels: usize, max_coefficients: usize) -> Self {
        Self {
            model: ScheduleModel::new(ScheduleLimits {
                max_blocks,
                max_channels,
                max_coefficients,
            }),
            store: None,
        }
    }

    /// Applies a control message. Raises `ValueError` and keeps the previous schedule if rejected.
    pub fn configure(&mut self, msg: &str) -> PyResult<()> {
        let config = parse_control_message(msg).map_err(value_error)?;
        self.model.apply(&config).map_err(value_error)?;
        self.store = None;
        Ok(())
    }

    pub fn set_schedule(
        &mut self,
        channel_count: usize,
        lengths: Vec<usize>,
        repeat_counts: Vec<usize>,
    ) -> PyResult<()> {
        if lengths.len() != repeat_counts.len() {
            return Err(value_error(format!(
                "{} lengths but {} repeat counts",
                lengths.len(),
                repeat_counts.len()
            )));
        }
        let blocks: Vec<Block> = lengths
            .into_iter()
            .zip(repeat_counts)
            .map(|(l, r)| Block::new(l, r))
            .collect();
        self.model
            .set_schedule(channel_count, &blocks)
            .map_err(value_error)?;
        self.store = None;
        Ok(())
    }

    /// Canonical control message of the active schedule.
    pub fn control_string(&self) -> String {
        ScheduleConfig::new(self.model.channel_count(), self.model.blocks().to_vec())
            .to_control_string()
    }

    pub fn channel_count(&self) -> usize {
        self.model.channel_count()
    }

    pub fn transitions(&self) -> Vec<usize> {
        self.model.transitions().to_vec()
    }

    pub fn base(&self) -> Vec<usize> {
        self.model.base().to_vec()
    }

    pub fn total_iterations(&self) -> usize {
        self.model.total_iterations()
    }

    pub fn total_samples(&self) -> usize {
        self.model.total_samples()
    }

    /// `(block, rep)` for `iteration`, or `None` once exhausted.
    pub fn resolve(&self, iteration: usize) -> Option<(usize, usize)> {
        self.model.resolve(iteration).map(|pos| (pos.block, pos.rep))
    }

    pub fn coefficient_offset(&self, channel: usize, block: usize, rep: usize) -> PyResult<usize> {
        if channel >= self.model.channel_count()
            || block >= self.model.block_count()
            || rep >= self.model.lengths()[block]
        {
            return Err(value_error(format!(
                "({channel}, {block}, {rep}) is outside the schedule"
            )));
        }
        Ok(self.model.coefficient_offset(channel, block, rep))
    }

    /// Loads coefficients in sample-major order.
    pub fn load_coefficients(&mut self, values: Vec<f32>) -> PyResult<()> {
        let store = CoefficientStore::from_values(
            self.model.channel_count(),
            self.model.total_samples(),
            values,
        )
        .map_err(value_error)?;
        self.store = Some(store);
        Ok(())
    }

    /// Per-iteration drive values for `start..end` as a `(channels, iterations)` array.
    pub fn render_waveform(&self, start: usize, end: usize, py: Python) -> PyResult<PyObject> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| value_error("no coefficients loaded"))?;
        let arr = self.model.render_waveform(store, start, end);
        Ok(numpy::PyArray::from_array(py, &arr).to_object(py))
    }
}

#[pymodule]
fn shimcompiler_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<Schedule>()?;
    Ok(())
}
