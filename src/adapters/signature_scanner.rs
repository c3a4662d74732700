use crate::ports::{MalwareScanner, ScanError, ScanVerdict};

const EICAR: &[u8] = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!";

/// Byte-signature scanner. Flags a file when any known signature appears in it.
///
/// Ships with the EICAR test signature only; real deployments plug a proper
/// engine in behind [`MalwareScanner`].
#[derive(Debug, Clone)]
pub struct SignatureScanner {
    signatures: Vec<(String, Vec<u8>)>,
}

impl Default for SignatureScanner {
    fn default() -> Self {
        Self {
            signatures: vec![("EICAR-Test-File".to_string(), EICAR.to_vec())],
        }
    }
}

impl SignatureScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signature(mut self, name: impl Into<String>, pattern: impl Into<Vec<u8>>) -> Self {
        let pattern = pattern.into();
        if !pattern.is_empty() {
            self.signatures.push((name.into(), pattern));
        }
        self
    }
}

#[async_trait::async_trait]
impl MalwareScanner for SignatureScanner {
    async fn scan(&self, data: &[u8]) -> Result<ScanVerdict, ScanError> {
        let hit = self.signatures.iter().find(|(_, pattern)| {
            pattern.len() <= data.len() && data.windows(pattern.len()).any(|w| w == &pattern[..])
        });
        Ok(match hit {
            Some((name, _)) => ScanVerdict::infected(name.clone()),
            None => ScanVerdict::clean(),
        })
    }
}
