use crate::models::ScoredChunk;

/// Joins retrieved passages into one numbered, blank-line delimited block.
/// An empty result set yields an empty string.
pub fn assemble_context(results: &[ScoredChunk]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(position, result)| {
            format!("Document {}:\n{}\n", position + 1, result.chunk.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
