//! ONNX export of a [`ScaledRegressor`].
//!
//! Only the subset of `onnx.proto` needed for a dense float graph is declared here; field
//! tags match the upstream schema so any ONNX runtime can load the result.

use std::fs;
use std::path::{Path, PathBuf};

use burn::nn::Linear;
use prost::Message;
use thiserror::Error;

use super::{Inference, ScaledRegressor};

pub const IR_VERSION: i64 = 6;
pub const OPSET_VERSION: i64 = 11;
pub const INPUT_NAME: &str = "float_input";
pub const OUTPUT_NAME: &str = "variable";
const PRODUCER_NAME: &str = env!("CARGO_PKG_NAME");
const PRODUCER_VERSION: &str = env!("CARGO_PKG_VERSION");
/// `TensorProto.DataType.FLOAT`
const FLOAT: i32 = 1;

#[derive(Clone, PartialEq, Message)]
pub struct ModelProto {
    #[prost(int64, tag = "1")]
    pub ir_version: i64,
    #[prost(string, tag = "2")]
    pub producer_name: String,
    #[prost(string, tag = "3")]
    pub producer_version: String,
    #[prost(message, optional, tag = "7")]
    pub graph: Option<GraphProto>,
    #[prost(message, repeated, tag = "8")]
    pub opset_import: Vec<OperatorSetIdProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OperatorSetIdProto {
    #[prost(string, tag = "1")]
    pub domain: String,
    #[prost(int64, tag = "2")]
    pub version: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct GraphProto {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeProto>,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, repeated, tag = "5")]
    pub initializer: Vec<TensorProto>,
    #[prost(message, repeated, tag = "11")]
    pub input: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "12")]
    pub output: Vec<ValueInfoProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NodeProto {
    #[prost(string, repeated, tag = "1")]
    pub input: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub output: Vec<String>,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub op_type: String,
    #[prost(string, tag = "7")]
    pub domain: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorProto {
    #[prost(int64, repeated, tag = "1")]
    pub dims: Vec<i64>,
    #[prost(int32, tag = "2")]
    pub data_type: i32,
    #[prost(float, repeated, tag = "4")]
    pub float_data: Vec<f32>,
    #[prost(string, tag = "8")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ValueInfoProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub r#type: Option<TypeProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TypeProto {
    #[prost(message, optional, tag = "1")]
    pub tensor_type: Option<TensorTypeProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorTypeProto {
    #[prost(int32, tag = "1")]
    pub elem_type: i32,
    #[prost(message, optional, tag = "2")]
    pub shape: Option<TensorShapeProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "1")]
    pub dim: Vec<Dimension>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Dimension {
    #[prost(oneof = "DimensionValue", tags = "1, 2")]
    pub value: Option<DimensionValue>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum DimensionValue {
    #[prost(int64, tag = "1")]
    DimValue(i64),
    #[prost(string, tag = "2")]
    DimParam(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write ONNX model to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Builds `Sub(mean) → Div(scale) → (MatMul → Add → Relu)* → MatMul → Add`.
///
/// Weights and biases are read from the fitted network's [`Linear`] modules.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn build_model_proto(model: &ScaledRegressor) -> ModelProto {
    let mut graph = Graph::default();
    let features = model.n_features();

    graph.vector("scaler_mean", model.scaler.mean().iter().map(|&v| v as f32).collect());
    graph.vector("scaler_scale", model.scaler.scale().iter().map(|&v| v as f32).collect());
    let mut current = graph.node("Sub", INPUT_NAME, "scaler_mean", "centered");
    current = graph.node("Div", &current, "scaler_scale", "scaled");

    let linears: Vec<&Linear<Inference>> = model.regressor.network().linears().collect();
    for (index, linear) in linears.iter().enumerate() {
        let weights = format!("coefficient_{index}");
        let bias = format!("intercept_{index}");
        let weight = linear.weight.val();
        let [rows, cols] = weight.dims();
        graph.tensor(&weights, &[rows, cols], weight.into_data().iter::<f32>().collect());
        let bias_values = linear.bias.as_ref().map_or_else(
            || vec![0.0; cols],
            |b| b.val().into_data().iter::<f32>().collect(),
        );
        graph.vector(&bias, bias_values);

        current = graph.node("MatMul", &current, &weights, &format!("mul_result_{index}"));
        let is_output = index + 1 == linears.len();
        let add_out = if is_output {
            OUTPUT_NAME.to_string()
        } else {
            format!("add_result_{index}")
        };
        current = graph.node("Add", &current, &bias, &add_out);
        if !is_output {
            current = graph.unary("Relu", &current, &format!("relu_result_{index}"));
        }
    }

    ModelProto {
        ir_version: IR_VERSION,
        producer_name: PRODUCER_NAME.to_string(),
        producer_version: PRODUCER_VERSION.to_string(),
        graph: Some(GraphProto {
            node: graph.nodes,
            name: "appeal_head".to_string(),
            initializer: graph.initializers,
            input: vec![value_info(INPUT_NAME, features)],
            output: vec![value_info(OUTPUT_NAME, 1)],
        }),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: OPSET_VERSION,
        }],
    }
}

/// Encodes [`build_model_proto`] and writes it to `path`.
///
/// # Errors
/// [`ExportError::Io`] when the file cannot be written.
pub fn export_onnx(model: &ScaledRegressor, path: &Path) -> Result<(), ExportError> {
    let bytes = build_model_proto(model).encode_to_vec();
    fs::write(path, bytes).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Default)]
struct Graph {
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
}

impl Graph {
    fn tensor(&mut self, name: &str, dims: &[usize], float_data: Vec<f32>) {
        self.initializers.push(TensorProto {
            dims: dims.iter().map(|d| i64::try_from(*d).unwrap_or(i64::MAX)).collect(),
            data_type: FLOAT,
            float_data,
            name: name.to_string(),
        });
    }

    fn vector(&mut self, name: &str, values: Vec<f32>) {
        let len = values.len();
        self.tensor(name, &[len], values);
    }

    fn node(&mut self, op_type: &str, lhs: &str, rhs: &str, output: &str) -> String {
        self.push(op_type, vec![lhs.to_string(), rhs.to_string()], output)
    }

    fn unary(&mut self, op_type: &str, input: &str, output: &str) -> String {
        self.push(op_type, vec![input.to_string()], output)
    }

    fn push(&mut self, op_type: &str, input: Vec<String>, output: &str) -> String {
        self.nodes.push(NodeProto {
            input,
            output: vec![output.to_string()],
            name: format!("{op_type}_{}", self.nodes.len()),
            op_type: op_type.to_string(),
            domain: String::new(),
        });
        output.to_string()
    }
}

/// `[N, width]` float tensor with a symbolic batch dimension.
fn value_info(name: &str, width: usize) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            tensor_type: Some(TensorTypeProto {
                elem_type: FLOAT,
                shape: Some(TensorShapeProto {
                    dim: vec![
                        Dimension {
                            value: Some(DimensionValue::DimParam("N".to_string())),
                        },
                        Dimension {
                            value: Some(DimensionValue::DimValue(
                                i64::try_from(width).unwrap_or(i64::MAX),
                            )),
                        },
                    ],
                }),
            }),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ml::{MlpConfig, MlpRegressor, StandardScaler};
    use ndarray::{Array2, array};

    fn fitted() -> ScaledRegressor {
        let x = array![[0.0, 1.0, 2.0], [1.0, 1.5, 0.0], [2.0, 0.5, 1.0], [3.0, 0.0, 4.0]];
        let y = array![0.2, 0.4, 0.6, 0.8];
        let scaler = StandardScaler::fit(x.view()).expect("scaler should fit");
        let scaled = scaler.transform(x.view()).expect("transform should succeed");
        let config = MlpConfig {
            hidden_layers: vec![5, 4],
            max_epochs: 10,
            ..MlpConfig::default()
        };
        let regressor =
            MlpRegressor::fit(scaled.view(), y.view(), &config).expect("regressor should fit");
        ScaledRegressor::new(scaler, regressor)
    }

    /// Runs the decoded graph with plain ndarray ops.
    fn evaluate(graph: &GraphProto, input: Array2<f32>) -> Array2<f32> {
        let mut values: HashMap<String, Array2<f32>> = HashMap::new();
        for init in &graph.initializer {
            let shape = match init.dims.as_slice() {
                [len] => (1, usize::try_from(*len).unwrap()),
                [rows, cols] => (usize::try_from(*rows).unwrap(), usize::try_from(*cols).unwrap()),
                other => panic!("unexpected dims {other:?}"),
            };
            values.insert(
                init.name.clone(),
                Array2::from_shape_vec(shape, init.float_data.clone()).unwrap(),
            );
        }
        values.insert(INPUT_NAME.to_string(), input);

        for node in &graph.node {
            let lhs = &values[&node.input[0]];
            let result = match node.op_type.as_str() {
                "Sub" => lhs - &values[&node.input[1]],
                "Div" => lhs / &values[&node.input[1]],
                "Add" => lhs + &values[&node.input[1]],
                "MatMul" => lhs.dot(&values[&node.input[1]]),
                "Relu" => lhs.mapv(|v| v.max(0.0)),
                other => panic!("unexpected op {other}"),
            };
            values.insert(node.output[0].clone(), result);
        }
        values.remove(OUTPUT_NAME).expect("graph should produce output")
    }

    #[test]
    fn graph_has_expected_layout() {
        let proto = build_model_proto(&fitted());

        assert_eq!(proto.ir_version, IR_VERSION);
        assert_eq!(proto.opset_import[0].version, OPSET_VERSION);
        let graph = proto.graph.expect("graph should be set");
        let ops: Vec<&str> = graph.node.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(
            ops,
            vec![
                "Sub", "Div", "MatMul", "Add", "Relu", "MatMul", "Add", "Relu", "MatMul", "Add"
            ]
        );
        assert_eq!(graph.initializer.len(), 2 + 3 * 2);
        assert_eq!(graph.input[0].name, INPUT_NAME);
        assert_eq!(graph.output[0].name, OUTPUT_NAME);

        let input_shape = graph.input[0]
            .r#type
            .as_ref()
            .and_then(|t| t.tensor_type.as_ref())
            .and_then(|t| t.shape.as_ref())
            .expect("input shape should be set");
        assert_eq!(
            input_shape.dim[1].value,
            Some(DimensionValue::DimValue(3))
        );
    }

    #[test]
    fn exported_graph_matches_native_predictions() {
        let model = fitted();
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("appeal_model.onnx");

        export_onnx(&model, &path).expect("export should succeed");
        let bytes = std::fs::read(&path).expect("file should exist");
        let decoded = ModelProto::decode(bytes.as_slice()).expect("model should decode");

        let x = array![[0.5, 1.0, 1.0], [2.5, 0.2, 3.0]];
        let expected = model.predict(x.view()).expect("predict should succeed");
        let actual = evaluate(
            decoded.graph.as_ref().expect("graph should be set"),
            x.mapv(|v| v as f32),
        );

        assert_eq!(actual.dim(), (2, 1));
        for (a, e) in actual.column(0).iter().zip(expected.iter()) {
            assert!((f64::from(*a) - e).abs() < 1e-4, "{a} vs {e}");
        }
    }
}
