use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};

/// Reduces a demangled signature to a name that is shared by all overloads and
/// template instantiations of a function.
///
/// Parameter lists are dropped, top-level template argument lists become `<...>`,
/// anything after the last parameter list is cut and a leading return type is
/// removed.
pub fn canonicalize_function_name(demangled_name: &str) -> String {
    let mut name = String::with_capacity(demangled_name.len());
    let mut template_depth: i32 = 0;
    let mut parenthesis_depth: i32 = 0;
    let mut parameters_end: Option<usize> = None;

    for c in demangled_name.chars() {
        match c {
            '(' => parenthesis_depth += 1,
            ')' => {
                parenthesis_depth -= 1;
                if parenthesis_depth == 0 {
                    parameters_end = Some(name.len());
                }
            }
            '<' => template_depth += 1,
            '>' => {
                template_depth -= 1;
                if parenthesis_depth == 0 && template_depth == 0 {
                    name.push_str("<...>");
                }
            }
            _ => {
                if parenthesis_depth == 0 && template_depth == 0 {
                    name.push(c);
                }
            }
        }
    }

    if let Some(end) = parameters_end {
        name.truncate(end);
    }

    let mut name = match name.rsplit(' ').next() {
        Some(last) => last.to_string(),
        None => name,
    };

    // The call operator loses its `()` to the parenthesis handling above.
    if name.ends_with("::operator") {
        name.push_str("()");
    }

    name
}

/// Demangles `name`, or returns it unchanged when it isn't a mangled symbol.
pub fn demangle(name: &str) -> String {
    Name::from(name)
        .demangle(DemangleOptions::complete())
        .unwrap_or_else(|| name.to_string())
}
