//! Job descriptors and a minimal kernel builder.
//!
//! The dispatcher treats a [`JobDescriptor`] as opaque: it clones it and
//! hands it to the executor, nothing more. [`Kernel`] is one concrete program
//! type that callers can put inside a descriptor. It records an ordered list
//! of named steps plus a loop body that the descriptor's repeat count
//! unrolls. What a step *means* is up to the executor.
//!
//! # Example
//!
//! ```
//! use mqpu_dispatch::kernel::{JobDescriptor, Kernel, Step};
//!
//! let kernel = Kernel::new("trotter", 4)
//!     .repeat([
//!         Step::new("cy", [0, 3]),
//!         Step::new("ry", [1]).with_params([0.26]),
//!         Step::new("cx", [1, 2]),
//!     ]);
//! let job = JobDescriptor::kernel(kernel, 7)?;
//! assert_eq!(job.program().unroll(job.repeat_count()).len(), 21);
//! # Ok::<(), mqpu_dispatch::error::ConfigError>(())
//! ```

use core::fmt;
use std::sync::Arc;

use briny::prelude::*;

use crate::error::ConfigError;

/// One named operation acting on a set of register slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Operation name, e.g. `"cx"`.
    pub op: String,
    /// Register slots the operation touches.
    pub targets: Vec<usize>,
    /// Numeric parameters, e.g. rotation angles.
    pub params: Vec<f64>,
}

impl Step {
    /// A parameterless step.
    pub fn new(op: impl Into<String>, targets: impl Into<Vec<usize>>) -> Self {
        Self { op: op.into(), targets: targets.into(), params: Vec::new() }
    }

    /// Attaches numeric parameters.
    #[must_use]
    pub fn with_params(mut self, params: impl Into<Vec<f64>>) -> Self {
        self.params = params.into();
        self
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if !self.params.is_empty() {
            write!(f, "({:?})", self.params)?;
        }
        write!(f, " {:?}", self.targets)
    }
}

/// An ordered program over a fixed-width register.
///
/// `preamble` runs once; `body` runs once per iteration of the job's repeat
/// count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Kernel {
    name: String,
    width: usize,
    preamble: Vec<Step>,
    body: Vec<Step>,
}

impl Kernel {
    /// An empty kernel over `width` register slots.
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self { name: name.into(), width, preamble: Vec::new(), body: Vec::new() }
    }

    /// Appends a step that runs once, before the loop.
    #[must_use]
    pub fn then(mut self, step: Step) -> Self {
        self.preamble.push(step);
        self
    }

    /// Appends steps to the loop body.
    #[must_use]
    pub fn repeat(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.body.extend(steps);
        self
    }

    /// Kernel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Steps in the loop body.
    #[must_use]
    pub fn body(&self) -> &[Step] {
        &self.body
    }

    /// Flattens the program for `iterations` loop iterations: the preamble,
    /// then the body folded `iterations` times.
    #[must_use]
    pub fn unroll(&self, iterations: u64) -> Vec<Step> {
        (0..iterations).fold(self.preamble.clone(), |mut acc, _| {
            acc.extend_from_slice(&self.body);
            acc
        })
    }
}

impl Validate for Kernel {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.width == 0 {
            return Err(ValidationError);
        }
        for step in self.preamble.iter().chain(&self.body) {
            if step.op.is_empty() || step.targets.is_empty() {
                return Err(ValidationError);
            }
            if step.targets.iter().any(|&t| t >= self.width) {
                return Err(ValidationError);
            }
            if step.params.iter().any(|p| !p.is_finite()) {
                return Err(ValidationError);
            }
        }
        Ok(())
    }
}

/// What to run and how many times to repeat it.
///
/// Immutable after construction. Cloning shares the program.
pub struct JobDescriptor<P> {
    program: Arc<P>,
    repeat_count: u64,
}

impl<P> JobDescriptor<P> {
    /// Wraps an already-built program.
    pub fn new(program: P, repeat_count: u64) -> Self {
        Self { program: Arc::new(program), repeat_count }
    }

    /// Wraps a shared program.
    pub fn from_shared(program: Arc<P>, repeat_count: u64) -> Self {
        Self { program, repeat_count }
    }

    /// The program.
    #[must_use]
    pub fn program(&self) -> &P {
        &self.program
    }

    /// Repeat count bound to the program's loop.
    #[must_use]
    pub const fn repeat_count(&self) -> u64 {
        self.repeat_count
    }
}

impl JobDescriptor<Kernel> {
    /// Validates `kernel` and binds it to `repeat_count`.
    ///
    /// # Errors
    /// Fails if the kernel has zero width, an empty or target-less step, a
    /// target outside the register, or a non-finite parameter.
    pub fn kernel(kernel: Kernel, repeat_count: u64) -> Result<Self, ConfigError> {
        let trusted = TrustedData::new(kernel)
            .map_err(|err| ConfigError::Validation { what: "kernel", err })?;
        Ok(Self::new(trusted.into_inner(), repeat_count))
    }
}

impl<P> Clone for JobDescriptor<P> {
    fn clone(&self) -> Self {
        Self { program: Arc::clone(&self.program), repeat_count: self.repeat_count }
    }
}

impl<P: fmt::Debug> fmt::Debug for JobDescriptor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("program", &self.program)
            .field("repeat_count", &self.repeat_count)
            .finish()
    }
}
