//! Naming conventions for tables and columns.
//!
//! Examples:
//! - `Hero` -> `heroes`
//! - `TeamMember` -> `team_members`
//! - `UserID` -> `user_id`

/// Convert PascalCase (or already snake_case) to snake_case.
///
/// Acronyms stay together: `HTTPServer` -> `http_server`.
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();

                // Word boundary after a lowercase run, or at the last capital
                // of an acronym that starts a new word.
                let should_underscore = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase()));

                if should_underscore && !result.ends_with('_') {
                    result.push('_');
                }
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Simple English pluralization of the last word of a snake_case name.
pub fn pluralize(name: &str) -> String {
    match name.rsplit_once('_') {
        Some((head, last)) => format!("{}_{}", head, pluralize_word(last)),
        None => pluralize_word(name),
    }
}

fn pluralize_word(word: &str) -> String {
    match word {
        "person" => return "people".to_string(),
        "child" => return "children".to_string(),
        "man" => return "men".to_string(),
        "woman" => return "women".to_string(),
        "foot" => return "feet".to_string(),
        "tooth" => return "teeth".to_string(),
        "goose" => return "geese".to_string(),
        "mouse" => return "mice".to_string(),
        "datum" => return "data".to_string(),
        "index" => return "indices".to_string(),
        "matrix" => return "matrices".to_string(),
        "vertex" => return "vertices".to_string(),
        "analysis" => return "analyses".to_string(),
        "crisis" => return "crises".to_string(),
        "axis" => return "axes".to_string(),
        _ => {}
    }

    if word.is_empty() {
        return word.to_string();
    }

    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }

    // quiz -> quizzes
    if word.ends_with('z') {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() >= 2 && "aeiou".contains(chars[chars.len() - 2]) {
            return format!("{word}zes");
        }
        return format!("{word}es");
    }

    if let Some(stripped) = word.strip_suffix('y') {
        if let Some(prev) = stripped.chars().last() {
            if !"aeiou".contains(prev) {
                return format!("{stripped}ies");
            }
        }
        return format!("{word}s");
    }

    if let Some(stripped) = word.strip_suffix("fe") {
        return format!("{stripped}ves");
    }

    if let Some(stripped) = word.strip_suffix('f') {
        return format!("{stripped}ves");
    }

    if word.ends_with('o') {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() >= 2 && !"aeiou".contains(chars[chars.len() - 2]) {
            let exceptions = ["photo", "piano", "halo", "memo", "pro", "auto"];
            if !exceptions.contains(&word) {
                return format!("{word}es");
            }
        }
    }

    format!("{word}s")
}

/// Default table name for a struct name.
pub fn table_name_for(struct_name: &str, singular: bool) -> String {
    let snake = to_snake_case(struct_name);
    if singular { snake } else { pluralize(&snake) }
}

/// Default foreign key column for a reference to `name`, e.g. `user_id`.
pub fn foreign_key_for(name: &str, primary_key: &str) -> String {
    format!("{}_{}", to_snake_case(name), primary_key)
}
