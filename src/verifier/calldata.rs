//! Flattens a snarkjs proof JSON into the field elements a Solidity verifier takes.
//!
//! * Groth16: `[a0, a1, b01, b00, b11, b10, c0, c1]`. The G2 coordinates are
//!   swapped to match the precompile's ordering.
//! * PLONK: the x/y coordinates of `A, B, C, Z, T1, T2, T3, Wxi, Wxiw`, then
//!   `eval_a, eval_b, eval_c, eval_s1, eval_s2, eval_zw`.

use crate::field::FieldElement;
use crate::prover::ProofScheme;
use crate::verifier::error::SubmissionError;
use serde_json::Value;

pub const GROTH16_CALLDATA_LEN: usize = 8;
pub const PLONK_CALLDATA_LEN: usize = 24;

const PLONK_POINTS: [&str; 9] = ["A", "B", "C", "Z", "T1", "T2", "T3", "Wxi", "Wxiw"];
const PLONK_EVALUATIONS: [&str; 6] = ["eval_a", "eval_b", "eval_c", "eval_s1", "eval_s2", "eval_zw"];

/// Reads the `protocol` field snarkjs writes into every proof.
pub fn detect_scheme(proof: &Value) -> Result<ProofScheme, SubmissionError> {
    match proof.get("protocol").and_then(Value::as_str) {
        Some("groth16") => Ok(ProofScheme::Groth16),
        Some("plonk") => Ok(ProofScheme::Plonk),
        Some(other) => Err(malformed(format!("unsupported protocol {other:?}"))),
        None => Err(malformed("missing protocol".to_string())),
    }
}

pub fn encode_proof(proof: &Value) -> Result<Vec<FieldElement>, SubmissionError> {
    match detect_scheme(proof)? {
        ProofScheme::Groth16 => groth16(proof),
        ProofScheme::Plonk => plonk(proof),
    }
}

fn groth16(proof: &Value) -> Result<Vec<FieldElement>, SubmissionError> {
    let calldata = vec![
        element(proof, &["pi_a", "0"])?,
        element(proof, &["pi_a", "1"])?,
        element(proof, &["pi_b", "0", "1"])?,
        element(proof, &["pi_b", "0", "0"])?,
        element(proof, &["pi_b", "1", "1"])?,
        element(proof, &["pi_b", "1", "0"])?,
        element(proof, &["pi_c", "0"])?,
        element(proof, &["pi_c", "1"])?,
    ];
    debug_assert_eq!(calldata.len(), GROTH16_CALLDATA_LEN);
    Ok(calldata)
}

fn plonk(proof: &Value) -> Result<Vec<FieldElement>, SubmissionError> {
    let mut calldata = Vec::with_capacity(PLONK_CALLDATA_LEN);
    for point in PLONK_POINTS {
        calldata.push(element(proof, &[point, "0"])?);
        calldata.push(element(proof, &[point, "1"])?);
    }
    for evaluation in PLONK_EVALUATIONS {
        calldata.push(element(proof, &[evaluation])?);
    }
    Ok(calldata)
}

/// Follows `path` through objects (by key) and arrays (by index).
fn element(proof: &Value, path: &[&str]) -> Result<FieldElement, SubmissionError> {
    let mut node = proof;
    for segment in path {
        let next = match node {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(*segment),
            _ => None,
        };
        node = next.ok_or_else(|| malformed(format!("missing {}", path.join("."))))?;
    }
    let text = match node {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(malformed(format!("{} is not a number", path.join(".")))),
    };
    text.parse()
        .map_err(|e| malformed(format!("{}: {}", path.join("."), e)))
}

fn malformed(message: String) -> SubmissionError {
    SubmissionError::MalformedProof(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn groth16_proof() -> Value {
        json!({
            "pi_a": ["1", "2", "1"],
            "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
            "pi_c": ["7", "8", "1"],
            "protocol": "groth16",
            "curve": "bn128"
        })
    }

    fn plonk_proof() -> Value {
        let mut proof = serde_json::Map::new();
        let mut next = 1u64;
        for point in PLONK_POINTS {
            proof.insert(point.into(), json!([next.to_string(), (next + 1).to_string(), "1"]));
            next += 2;
        }
        for evaluation in PLONK_EVALUATIONS {
            proof.insert(evaluation.into(), json!(next.to_string()));
            next += 1;
        }
        proof.insert("protocol".into(), json!("plonk"));
        Value::Object(proof)
    }

    fn values(calldata: &[FieldElement]) -> Vec<u64> {
        calldata.iter().map(|e| e.to_string().parse().unwrap()).collect()
    }

    #[test]
    fn groth16_swaps_g2_coordinates() {
        let calldata = encode_proof(&groth16_proof()).unwrap();
        assert_eq!(values(&calldata), vec![1, 2, 4, 3, 6, 5, 7, 8]);
    }

    #[test]
    fn plonk_is_points_then_evaluations() {
        let calldata = encode_proof(&plonk_proof()).unwrap();
        assert_eq!(calldata.len(), PLONK_CALLDATA_LEN);
        assert_eq!(values(&calldata), (1..=24).collect::<Vec<u64>>());
    }

    #[test]
    fn missing_coordinate_is_malformed() {
        let mut proof = groth16_proof();
        proof["pi_c"] = json!(["7"]);
        match encode_proof(&proof) {
            Err(SubmissionError::MalformedProof(message)) => assert!(message.contains("pi_c.1")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_protocol_is_malformed() {
        assert!(matches!(
            encode_proof(&json!({ "protocol": "fflonk" })),
            Err(SubmissionError::MalformedProof(_))
        ));
        assert!(matches!(
            encode_proof(&json!({})),
            Err(SubmissionError::MalformedProof(_))
        ));
    }
}
