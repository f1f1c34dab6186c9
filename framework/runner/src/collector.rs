use qos_tunnel_core::prelude::WorkloadResult;

use crate::workload::{ResultArtifact, WorkloadError};

/// Read the readings of a finished workload.
pub fn collect(artifact: ResultArtifact) -> Result<WorkloadResult, WorkloadError> {
    match artifact {
        ResultArtifact::File(path) => {
            let file = std::fs::File::open(&path).map_err(|e| WorkloadError::Artifact {
                artifact: path.display().to_string(),
                reason: e.to_string(),
            })?;
            WorkloadResult::from_json_reader(file).map_err(|e| WorkloadError::Artifact {
                artifact: path.display().to_string(),
                reason: e.to_string(),
            })
        }
        ResultArtifact::Inline(json) => {
            WorkloadResult::from_json_str(&json).map_err(|e| WorkloadError::Artifact {
                artifact: "inline".to_string(),
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn collect_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"MB/sec": "100.5", "rate": "800"}}]"#).unwrap();

        let result = collect(ResultArtifact::File(file.path().to_path_buf())).unwrap();
        assert_eq!(1, result.total.len());
        assert_eq!(Some(100.5), result.total.last().map(|s| s.bw));
    }

    #[test]
    fn missing_file_is_an_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect(ResultArtifact::File(dir.path().join("missing.json"))).unwrap_err();
        assert!(matches!(err, WorkloadError::Artifact { .. }));
    }

    #[test]
    fn garbage_is_an_artifact_error() {
        let err = collect(ResultArtifact::Inline("not json".to_string())).unwrap_err();
        assert!(matches!(err, WorkloadError::Artifact { .. }));
    }
}
