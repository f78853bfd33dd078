//! Generation parameters.
//!
//! Typed knobs understood by text-generation-inference plus a free-form map
//! for anything else. Unset fields are left out of the request so the server
//! default applies.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::error::LLMError;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,

    /// Temperature parameter for controlling response randomness
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Top-k sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Top-p (nucleus) sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Typical decoding mass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typical_p: Option<f32>,

    /// Penalty applied to repeated tokens (1.0 = none)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,

    /// Truncate the prompt to this many tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<u32>,

    /// Sequences that will cause generation to stop
    #[serde(
        rename = "stop",
        alias = "stop_sequences",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub stop_sequences: Vec<String>,

    /// Random seed for reproducible sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Sample instead of greedy decoding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,

    /// Add a watermark to the generated text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<bool>,

    /// Prepend the prompt to the generated text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_full_text: Option<bool>,

    /// Anything else, forwarded verbatim
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl GenerationParams {
    /// Field names with a typed counterpart, as they appear on the wire.
    pub const FIELDS: &'static [&'static str] = &[
        "max_new_tokens",
        "temperature",
        "top_k",
        "top_p",
        "typical_p",
        "repetition_penalty",
        "truncate",
        "stop",
        "stop_sequences",
        "seed",
        "do_sample",
        "watermark",
        "return_full_text",
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = Some(max_new_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn typical_p(mut self, typical_p: f32) -> Self {
        self.typical_p = Some(typical_p);
        self
    }

    pub fn repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = Some(penalty);
        self
    }

    pub fn truncate(mut self, truncate: u32) -> Self {
        self.truncate = Some(truncate);
        self
    }

    pub fn stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn do_sample(mut self, do_sample: bool) -> Self {
        self.do_sample = Some(do_sample);
        self
    }

    pub fn watermark(mut self, watermark: bool) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn return_full_text(mut self, return_full_text: bool) -> Self {
        self.return_full_text = Some(return_full_text);
        self
    }

    /// Sets a parameter without a typed field
    pub fn parameter<K: Into<String>>(mut self, key: K, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Parameters for a single call: `runtime_stop` is appended to the
    /// configured stop sequences and `overrides` are merged over the extra map.
    pub fn invocation_params(
        &self,
        runtime_stop: Option<&[String]>,
        overrides: &Map<String, Value>,
    ) -> GenerationParams {
        let mut params = self.clone();
        if let Some(stop) = runtime_stop {
            params.stop_sequences.extend(stop.iter().cloned());
        }
        for (k, v) in overrides {
            params.extra.insert(k.clone(), v.clone());
        }
        params
    }

    /// Converts params to JSON value
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Moves keys of `values` that are not `reserved` into `extra` and checks
/// that `extra` does not shadow a reserved name.
///
/// Unknown keys are accepted with a warning so typos stay visible; a key
/// present in both maps, or a reserved key inside `extra`, is an error.
pub fn build_extra_kwargs(
    mut extra: Map<String, Value>,
    values: Map<String, Value>,
    reserved: &[&str],
) -> Result<Map<String, Value>, LLMError> {
    for (name, value) in values {
        if extra.contains_key(&name) {
            return Err(LLMError::InvalidRequest(format!(
                "Found {} supplied twice.",
                name
            )));
        }
        if reserved.contains(&name.as_str()) {
            continue;
        }
        log::warn!(
            "WARNING! {} is not a default parameter. {} was transferred to model_kwargs. \
             Please confirm that {} is what you intended.",
            name,
            name,
            name
        );
        extra.insert(name, value);
    }

    let invalid: BTreeSet<&str> = extra
        .keys()
        .map(String::as_str)
        .filter(|k| reserved.contains(k))
        .collect();
    if !invalid.is_empty() {
        let names = invalid
            .iter()
            .map(|n| format!("'{}'", n))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(LLMError::InvalidRequest(format!(
            "Parameters {{{}}} should be specified explicitly. Instead they were passed in as part of `model_kwargs` parameter.",
            names
        )));
    }

    Ok(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn unset_fields_are_not_serialized() {
        let params = GenerationParams::new().max_new_tokens(20).stop_sequence("</s>");
        assert_eq!(
            params.to_json().unwrap(),
            json!({"max_new_tokens": 20, "stop": ["</s>"]})
        );
    }

    #[test]
    fn extra_parameters_are_flattened() {
        let params = GenerationParams::new()
            .temperature(0.5)
            .parameter("best_of", 2);
        assert_eq!(
            params.to_json().unwrap(),
            json!({"temperature": 0.5, "best_of": 2})
        );
    }

    #[test]
    fn deserializes_known_and_unknown_keys() {
        let params: GenerationParams =
            serde_json::from_value(json!({"top_k": 10, "stop_sequences": ["x"], "foo": "bar"}))
                .unwrap();
        assert_eq!(params.top_k, Some(10));
        assert_eq!(params.stop_sequences, vec!["x".to_string()]);
        assert_eq!(params.extra.get("foo"), Some(&json!("bar")));
    }

    #[test]
    fn invocation_params_appends_runtime_stop_and_merges_overrides() {
        let params = GenerationParams::new().stop_sequence("\n\n");
        let base = params.invocation_params(None, &Map::new());
        let stop = vec!["</s>".to_string()];
        let with_stop = params.invocation_params(Some(&stop), &map(json!({"foo": "bar"})));

        let mut expected = base.stop_sequences.clone();
        expected.extend(stop);
        assert_eq!(with_stop.stop_sequences, expected);
        assert_eq!(with_stop.extra.get("foo"), Some(&json!("bar")));
        assert_eq!(params.stop_sequences, vec!["\n\n".to_string()]);
    }

    #[test]
    fn build_extra_kwargs_merges_unknown_values() {
        let extra = map(json!({"model_kwarg_1": "foo", "model_kwarg_2": "bar"}));
        let values = map(json!({"model_kwarg_3": "baz"}));
        let merged =
            build_extra_kwargs(extra, values, &["typed_field_1", "typed_field_2"]).unwrap();
        assert_eq!(
            Value::Object(merged),
            json!({"model_kwarg_1": "foo", "model_kwarg_2": "bar", "model_kwarg_3": "baz"})
        );
    }

    #[test]
    fn build_extra_kwargs_rejects_duplicates() {
        let extra = map(json!({"model_kwarg_1": "foo", "model_kwarg_2": "bar"}));
        let values = map(json!({"model_kwarg_1": "foo"}));
        let err = build_extra_kwargs(extra, values, &["typed_field_1"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Request: Found model_kwarg_1 supplied twice."
        );
    }

    #[test]
    fn build_extra_kwargs_rejects_reserved_names() {
        let extra = map(json!({"typed_field_1": "foo", "model_kwarg_2": "bar"}));
        let values = map(json!({"model_kwarg_1": "foo"}));
        let err =
            build_extra_kwargs(extra, values, &["typed_field_1", "typed_field_2"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Request: Parameters {'typed_field_1'} should be specified explicitly. \
             Instead they were passed in as part of `model_kwargs` parameter."
        );
    }

    #[test]
    fn build_extra_kwargs_skips_reserved_values() {
        let values = map(json!({"temperature": 0.1, "custom": 1}));
        let merged = build_extra_kwargs(Map::new(), values, GenerationParams::FIELDS).unwrap();
        assert_eq!(Value::Object(merged), json!({"custom": 1}));
    }
}
