use std::fmt::Write as _;

/// Formats an integer without going through `core::fmt`.
#[inline]
pub fn format_int(value: i64) -> String {
    let mut buf = itoa::Buffer::new();
    buf.format(value).to_string()
}

/// Shortest round-tripping float text, laid out the way `repr(float)` does:
/// fixed notation while the decimal point sits within 16 digits, scientific
/// notation with a signed two-digit exponent otherwise.
pub fn format_float(value: f64) -> String {
    format_float_with(value, true)
}

/// Same as [`format_float`] but without forcing a trailing `.0` on integral
/// values. Used for the components of complex numbers.
pub fn format_float_bare(value: f64) -> String {
    format_float_with(value, false)
}

fn format_float_with(value: f64, add_dot_0: bool) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }

    let mut buf = ryu::Buffer::new();
    let raw = buf.format_finite(value);
    let (negative, body) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let (mantissa, exp) = match body.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (body, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    let mut digits: String = int_part.chars().chain(frac_part.chars()).collect();
    let mut decpt = int_part.len() as i32 + exp;
    while digits.starts_with('0') {
        digits.remove(0);
        decpt -= 1;
    }
    while digits.ends_with('0') {
        digits.pop();
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if digits.is_empty() {
        out.push('0');
        if add_dot_0 {
            out.push_str(".0");
        }
        return out;
    }

    let ndigits = digits.len() as i32;
    if decpt <= -4 || decpt > 16 {
        let e = decpt - 1;
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let _ = write!(out, "e{}{:02}", if e < 0 { '-' } else { '+' }, e.abs());
    } else if decpt <= 0 {
        out.push_str("0.");
        for _ in 0..(-decpt) {
            out.push('0');
        }
        out.push_str(&digits);
    } else if decpt >= ndigits {
        out.push_str(&digits);
        for _ in 0..(decpt - ndigits) {
            out.push('0');
        }
        if add_dot_0 {
            out.push_str(".0");
        }
    } else {
        let split = decpt as usize;
        out.push_str(&digits[..split]);
        out.push('.');
        out.push_str(&digits[split..]);
    }
    out
}

pub fn format_complex(re: f64, im: f64) -> String {
    let imag = format_float_bare(im);
    if re == 0.0 && re.is_sign_positive() {
        return format!("{imag}j");
    }
    let sign = if imag.starts_with('-') { "" } else { "+" };
    format!("({}{}{}j)", format_float_bare(re), sign, imag)
}

/// Quotes a string the way `repr(str)` does for byte strings: single quotes
/// unless the text contains a single quote and no double quote, control and
/// non-ASCII bytes as `\xNN`.
pub fn quote_str(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for byte in text.bytes() {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b if b == quote as u8 => {
                out.push('\\');
                out.push(quote);
            }
            b if !(0x20..0x7f).contains(&b) => {
                let _ = write!(out, "\\x{b:02x}");
            }
            b => out.push(b as char),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_follow_repr_layout() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1e15), "1000000000000000.0");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(0.00001), "1e-05");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn complex_drops_real_zero() {
        assert_eq!(format_complex(0.0, 2.0), "2j");
        assert_eq!(format_complex(1.0, 2.0), "(1+2j)");
        assert_eq!(format_complex(1.5, -2.0), "(1.5-2j)");
    }

    #[test]
    fn strings_pick_quote_and_escape() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
        assert_eq!(quote_str("\u{1}"), "'\\x01'");
    }
}
