//! Name normalization for matching pasted monster lists against the catalog

/// Shortest token allowed to match a name by substring
pub const MIN_PARTIAL_LEN: usize = 4;

/// Split a pasted list on commas, semicolons and newlines
pub fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split([',', ';', '\n', '\r'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Lower-case, fold accents, turn punctuation into spaces and collapse runs
/// of whitespace.
pub fn normalize_tokens(value: &str) -> String {
    let mapped: String = value
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}
