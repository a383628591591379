//! Evaluation requests and their identity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque handle combining an ansatz and an observable.
///
/// The core never interprets these fields; they are passed through to the
/// backend unchanged. Backends decide what `ansatz` and `observable` mean
/// (an OpenQASM program and a Pauli sum, a registered function name, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProblemDescriptor {
    /// Name of the problem instance.
    pub name: String,
    /// Ansatz definition.
    #[serde(default)]
    pub ansatz: String,
    /// Observable or cost definition.
    #[serde(default)]
    pub observable: String,
}

impl ProblemDescriptor {
    /// Create a descriptor with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ansatz: String::new(),
            observable: String::new(),
        }
    }

    /// Set the ansatz definition.
    pub fn with_ansatz(mut self, ansatz: impl Into<String>) -> Self {
        self.ansatz = ansatz.into();
        self
    }

    /// Set the observable definition.
    pub fn with_observable(mut self, observable: impl Into<String>) -> Self {
        self.observable = observable.into();
        self
    }
}

impl fmt::Display for ProblemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// What a request evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationKind {
    /// Plain objective value.
    Value,
    /// One shifted term of a gradient component.
    GradientComponent {
        /// Index of the differentiated parameter.
        parameter: usize,
        /// Signed shift applied to that parameter.
        shift: f64,
    },
    /// One element of a batched evaluation.
    BatchElement {
        /// Position within the batch.
        index: usize,
    },
}

/// One evaluation of a problem at a parameter vector.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    /// Parameter values, in ansatz order.
    pub parameters: Vec<f64>,
    /// Evaluation kind.
    pub kind: EvaluationKind,
    /// Problem being evaluated.
    pub descriptor: Arc<ProblemDescriptor>,
}

impl EvaluationRequest {
    /// Create a new request.
    pub fn new(
        descriptor: Arc<ProblemDescriptor>,
        parameters: Vec<f64>,
        kind: EvaluationKind,
    ) -> Self {
        Self {
            parameters,
            kind,
            descriptor,
        }
    }

    /// Create a plain value request.
    pub fn value(descriptor: Arc<ProblemDescriptor>, parameters: Vec<f64>) -> Self {
        Self::new(descriptor, parameters, EvaluationKind::Value)
    }

    /// Identity used for de-duplicating in-flight work.
    ///
    /// Two requests share a key when they evaluate the same descriptor at
    /// bit-identical parameters. The kind is not part of the key: a
    /// gradient term and a value request at the same point produce the
    /// same payload.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            descriptor: self.descriptor.name.clone(),
            parameters: self.parameters.iter().map(|p| p.to_bits()).collect(),
        }
    }
}

/// Hashable identity of an [`EvaluationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    descriptor: String,
    parameters: Vec<u64>,
}
