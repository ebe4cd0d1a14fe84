use crate::model::InferredType;
use crate::target::{Target, TargetCapabilities};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire encoding declared on a connection. A stateless variant selector; the
/// concrete code emitted for it depends on the federate's target backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Native,
    Proto,
    Ros2,
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializerKind::Native => write!(f, "native"),
            SerializerKind::Proto => write!(f, "proto"),
            SerializerKind::Ros2 => write!(f, "ros2"),
        }
    }
}

/// Name of the buffer variable every `emit_serializer` fragment declares.
pub const SERIALIZED_VAR: &str = "serialized_message";
/// Name of the variable every `emit_deserializer` fragment declares, so the
/// triggering reaction can reference the decoded value.
pub const DESERIALIZED_VAR: &str = "deserialized_message";

/// Pluggable codec used by the partitioner to move a value across a federate
/// boundary. Callers may not assume a particular buffer representation; only
/// that `length_expression` and `buffer_expression` are valid together in the
/// scope created by `emit_serializer`.
pub trait SerializationStrategy: Send + Sync {
    fn kind(&self) -> SerializerKind;

    /// Pure compatibility predicate against a target backend. On failure the
    /// returned reason is surfaced to the user, never dropped.
    fn is_compatible(&self, capabilities: &TargetCapabilities) -> std::result::Result<(), String>;

    /// Target-language expression for the serialized buffer's length.
    fn length_expression(&self, buffer_var: &str) -> String;

    /// Target-language expression for the serialized buffer's pointer/handle.
    fn buffer_expression(&self, buffer_var: &str) -> String;

    /// Code that serializes `value_expr` of `declared_type` into a freshly
    /// declared buffer named [`SERIALIZED_VAR`].
    fn emit_serializer(&self, value_expr: &str, declared_type: &InferredType) -> String;

    /// Inverse of `emit_serializer`; declares [`DESERIALIZED_VAR`] holding the
    /// decoded value.
    fn emit_deserializer(&self, value_expr: &str, declared_type: &InferredType) -> String;
}

/// Bit-for-bit copy of the in-process representation. Only sound between
/// federates built for the same target and ABI, which is exactly the case the
/// partitioner uses it for.
pub struct NativeCSerialization;

impl SerializationStrategy for NativeCSerialization {
    fn kind(&self) -> SerializerKind {
        SerializerKind::Native
    }

    fn is_compatible(&self, capabilities: &TargetCapabilities) -> std::result::Result<(), String> {
        match capabilities.target {
            Target::C => Ok(()),
            other => Err(format!(
                "Native C serialization is not applicable to the {other} target."
            )),
        }
    }

    fn length_expression(&self, buffer_var: &str) -> String {
        format!("{buffer_var}_length")
    }

    fn buffer_expression(&self, buffer_var: &str) -> String {
        buffer_var.to_string()
    }

    fn emit_serializer(&self, value_expr: &str, declared_type: &InferredType) -> String {
        let c_type = c_type_of(declared_type);
        format!(
            "{c_type} _rhea_message = {value_expr};\n\
             size_t {SERIALIZED_VAR}_length = sizeof({c_type});\n\
             unsigned char* {SERIALIZED_VAR} = (unsigned char*)&_rhea_message;"
        )
    }

    fn emit_deserializer(&self, value_expr: &str, declared_type: &InferredType) -> String {
        let c_type = c_type_of(declared_type);
        format!("{c_type} {DESERIALIZED_VAR} = *(({c_type}*){value_expr});")
    }
}

/// Python pickle encoding, usable for any picklable value.
pub struct NativePythonSerialization;

impl SerializationStrategy for NativePythonSerialization {
    fn kind(&self) -> SerializerKind {
        SerializerKind::Native
    }

    fn is_compatible(&self, capabilities: &TargetCapabilities) -> std::result::Result<(), String> {
        match capabilities.target {
            Target::Python => Ok(()),
            other => Err(format!(
                "Native Python serialization is not applicable to the {other} target."
            )),
        }
    }

    fn length_expression(&self, buffer_var: &str) -> String {
        format!("len({buffer_var})")
    }

    fn buffer_expression(&self, buffer_var: &str) -> String {
        buffer_var.to_string()
    }

    fn emit_serializer(&self, value_expr: &str, _declared_type: &InferredType) -> String {
        format!("{SERIALIZED_VAR} = pickle.dumps({value_expr})")
    }

    fn emit_deserializer(&self, value_expr: &str, _declared_type: &InferredType) -> String {
        format!("{DESERIALIZED_VAR} = pickle.loads({value_expr})")
    }
}

/// Robotics-middleware encoding via rclcpp's serialization support. The port
/// type is used verbatim as the message type, which surfaces as a toolchain
/// error if it is not a valid message type.
pub struct Ros2Serialization;

impl SerializationStrategy for Ros2Serialization {
    fn kind(&self) -> SerializerKind {
        SerializerKind::Ros2
    }

    fn is_compatible(&self, capabilities: &TargetCapabilities) -> std::result::Result<(), String> {
        if capabilities.target != Target::C {
            return Err("ROS2 serialization is currently only supported for the C target.".to_string());
        }
        if !capabilities.compiler.eq_ignore_ascii_case("g++") {
            return Err(
                "Please use the 'compiler: \"g++\"' target property for ROS2 serialization.".to_string(),
            );
        }
        Ok(())
    }

    fn length_expression(&self, buffer_var: &str) -> String {
        format!("{buffer_var}.size()")
    }

    fn buffer_expression(&self, buffer_var: &str) -> String {
        format!("{buffer_var}.get_rcl_serialized_message().buffer")
    }

    fn emit_serializer(&self, value_expr: &str, declared_type: &InferredType) -> String {
        format!(
            "rclcpp::SerializedMessage {SERIALIZED_VAR}(0u);\n\
             using MessageT = {declared_type};\n\
             static rclcpp::Serialization<MessageT> serializer;\n\
             serializer.serialize_message(&{value_expr}, &{SERIALIZED_VAR});"
        )
    }

    fn emit_deserializer(&self, value_expr: &str, declared_type: &InferredType) -> String {
        format!(
            "using MessageT = {declared_type};\n\
             MessageT {DESERIALIZED_VAR};\n\
             auto deserializer = rclcpp::Serialization<MessageT>();\n\
             deserializer.deserialize_message({value_expr}, &{DESERIALIZED_VAR});"
        )
    }
}

fn c_type_of(declared_type: &InferredType) -> String {
    match declared_type {
        InferredType::Void => "void*".to_string(),
        InferredType::Time => "interval_t".to_string(),
        InferredType::Named(name) => name.clone(),
    }
}

/// Single selection point for serialization strategies. Unimplemented
/// kind/target pairs fail fast here rather than emitting broken code; the
/// failure is fatal for the requesting federate only.
pub fn strategy_for(kind: SerializerKind, target: Target) -> Result<Box<dyn SerializationStrategy>> {
    match (kind, target) {
        (SerializerKind::Native, Target::C) => Ok(Box::new(NativeCSerialization)),
        (SerializerKind::Native, Target::Python) => Ok(Box::new(NativePythonSerialization)),
        (SerializerKind::Ros2, Target::C) => Ok(Box::new(Ros2Serialization)),
        (SerializerKind::Proto, target) => Err(anyhow!(
            "Unsupported serialization: protobuf serialization is not yet implemented for the {target} target."
        )),
        (kind, target) => Err(anyhow!(
            "Unsupported serialization: {kind} serialization is not yet implemented for the {target} target."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::backend_for;

    #[test]
    fn proto_is_rejected_for_every_target() {
        for target in [Target::C, Target::Python] {
            let err = strategy_for(SerializerKind::Proto, target).err().unwrap();
            assert!(err.to_string().contains("Unsupported serialization"));
        }
    }

    #[test]
    fn ros2_requires_gpp_compiler() {
        let strategy = Ros2Serialization;
        let mut capabilities = backend_for(Target::C).unwrap().capabilities();
        capabilities.compiler = "g++".to_string();
        assert!(strategy.is_compatible(&capabilities).is_ok());

        capabilities.compiler = "clang".to_string();
        let reason = strategy.is_compatible(&capabilities).unwrap_err();
        assert!(reason.contains("g++"));
    }

    #[test]
    fn ros2_is_incompatible_with_python() {
        let strategy = Ros2Serialization;
        let capabilities = backend_for(Target::Python).unwrap().capabilities();
        let reason = strategy.is_compatible(&capabilities).unwrap_err();
        assert!(reason.contains("only supported for the C target"));
    }

    #[test]
    fn native_c_expressions_agree_with_emitted_serializer() {
        let strategy = NativeCSerialization;
        let declared = InferredType::Named("int".to_string());
        let code = strategy.emit_serializer("out->value", &declared);

        // The serializer must declare both names the expressions reference.
        assert!(code.contains(&format!("unsigned char* {SERIALIZED_VAR}")));
        assert!(code.contains(&strategy.length_expression(SERIALIZED_VAR)));
        assert!(strategy.buffer_expression(SERIALIZED_VAR).contains(SERIALIZED_VAR));
    }

    #[test]
    fn deserializers_declare_the_fixed_variable() {
        let declared = InferredType::Named("int".to_string());
        let strategies: Vec<Box<dyn SerializationStrategy>> = vec![
            Box::new(NativeCSerialization),
            Box::new(NativePythonSerialization),
            Box::new(Ros2Serialization),
        ];
        for strategy in strategies {
            let code = strategy.emit_deserializer("message", &declared);
            assert!(
                code.contains(DESERIALIZED_VAR),
                "{:?} deserializer misses {DESERIALIZED_VAR}",
                strategy.kind()
            );
        }
    }
}
