use msvc_demangler::DemangleFlags;

/// Turns a raw symbol name into a readable one.
///
/// Recognizes MSVC, Rust and Itanium manglings by their prefixes. Anything
/// unrecognized or malformed comes back unchanged; this function never
/// fails.
pub fn demangle(name: &str) -> String {
    if name.starts_with('?') {
        let flags = DemangleFlags::NO_ACCESS_SPECIFIERS
            | DemangleFlags::NO_FUNCTION_RETURNS
            | DemangleFlags::NO_MEMBER_TYPE
            | DemangleFlags::NO_MS_KEYWORDS
            | DemangleFlags::NO_THISTYPE
            | DemangleFlags::NO_CLASS_TYPE
            | DemangleFlags::SPACE_AFTER_COMMA
            | DemangleFlags::HUG_TYPE;
        return msvc_demangler::demangle(name, flags).unwrap_or_else(|_| name.to_string());
    }

    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{demangled:#}");
    }

    if name.starts_with('_') {
        let options = cpp_demangle::DemangleOptions::default().no_return_type();
        if let Ok(symbol) = cpp_demangle::Symbol::new(name) {
            if let Ok(demangled) = symbol.demangle_with_options(&options) {
                return demangled;
            }
        }
    }

    name.to_string()
}
