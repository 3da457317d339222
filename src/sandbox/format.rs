// Output formatting: printf directives, python format specs, rust format strings

use super::value::Value;
use crate::grammar::Language;

/// `%g` formatting with `precision` significant digits.
pub fn format_general(value: f64, precision: usize, upper: bool) -> String {
    if !value.is_finite() {
        return non_finite(value, upper);
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let precision = precision.max(1);
    let exponent = decimal_exponent(value, precision);
    if exponent < -4 || exponent >= precision as i32 {
        let sci = format_exponent(value, precision - 1, upper);
        match sci.find(['e', 'E']) {
            Some(pos) => format!("{}{}", trim_fraction(&sci[..pos]), &sci[pos..]),
            None => sci,
        }
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

/// C-style scientific notation: `1.500000e+02`.
pub fn format_exponent(value: f64, precision: usize, upper: bool) -> String {
    if !value.is_finite() {
        return non_finite(value, upper);
    }
    let raw = format!("{:.*e}", precision, value);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

fn decimal_exponent(value: f64, precision: usize) -> i32 {
    let raw = format!("{:.*e}", precision.saturating_sub(1), value);
    raw.split_once('e').and_then(|(_, e)| e.parse().ok()).unwrap_or(0)
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn non_finite(value: f64, upper: bool) -> String {
    let text = if value.is_nan() {
        "nan"
    } else if value < 0.0 {
        "-inf"
    } else {
        "inf"
    };
    if upper {
        text.to_uppercase()
    } else {
        text.to_string()
    }
}

/// Widths and precisions above this are rejected instead of padded out.
pub const MAX_FIELD_WIDTH: usize = 100_000;

/// A width or precision written as decimal digits. Negative `*` arguments
/// count as zero.
fn field_size(digits: &str) -> Result<usize, String> {
    if digits.is_empty() || digits.starts_with('-') {
        return Ok(0);
    }
    match digits.parse::<usize>() {
        Ok(n) if n <= MAX_FIELD_WIDTH => Ok(n),
        _ => Err(format!("format field width {} exceeds the limit of {}", digits, MAX_FIELD_WIDTH)),
    }
}

fn int_arg(value: &Value) -> Result<i64, String> {
    match value.deref() {
        Value::Float(f) => Ok(f as i64),
        other => other
            .as_int()
            .ok_or_else(|| format!("expected a number, got {}", other.type_name())),
    }
}

fn float_arg(value: &Value) -> Result<f64, String> {
    value
        .deref()
        .as_f64()
        .ok_or_else(|| format!("expected a number, got {}", value.type_name()))
}

/// printf-family formatting (`printf`, `String.format`, python `%`).
pub fn printf(template: &str, args: &[Value], language: Language) -> Result<String, String> {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut flags = String::new();
        while let Some(&f) = chars.peek() {
            if "-+ 0#".contains(f) {
                flags.push(f);
                chars.next();
            } else {
                break;
            }
        }
        let mut width = String::new();
        if chars.peek() == Some(&'*') {
            chars.next();
            let next = args.next().ok_or("not enough arguments for format string")?;
            width = int_arg(next)?.to_string();
        }
        while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            if chars.peek() == Some(&'*') {
                chars.next();
                let next = args.next().ok_or("not enough arguments for format string")?;
                digits = int_arg(next)?.max(0).to_string();
            }
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            precision = Some(field_size(&digits)?);
        }
        while let Some(&l) = chars.peek() {
            if "hlLqjzt".contains(l) {
                chars.next();
            } else {
                break;
            }
        }

        let Some(conversion) = chars.next() else {
            out.push('%');
            break;
        };
        if conversion == 'n' && language == Language::Java {
            out.push('\n');
            continue;
        }

        let arg = args.next().ok_or("not enough arguments for format string")?;
        let left = flags.contains('-');
        let zero = flags.contains('0') && !left;
        let sign = if flags.contains('+') {
            "+"
        } else if flags.contains(' ') {
            " "
        } else {
            ""
        };

        let (body, numeric) = match conversion {
            'd' | 'i' | 'u' => (with_sign(int_arg(arg)?.to_string(), sign), true),
            'f' | 'F' => (with_sign(format!("{:.*}", precision.unwrap_or(6), float_arg(arg)?), sign), true),
            'e' | 'E' => (
                with_sign(format_exponent(float_arg(arg)?, precision.unwrap_or(6), conversion == 'E'), sign),
                true,
            ),
            'g' | 'G' => (
                with_sign(format_general(float_arg(arg)?, precision.unwrap_or(6), conversion == 'G'), sign),
                true,
            ),
            'x' => (format!("{:x}", int_arg(arg)?), true),
            'X' => (format!("{:X}", int_arg(arg)?), true),
            'o' => (format!("{:o}", int_arg(arg)?), true),
            'c' => {
                let c = match arg.deref() {
                    Value::Char(c) => c,
                    Value::Str(s) => s.chars().next().unwrap_or('\0'),
                    other => char::from_u32(int_arg(&other)? as u32).unwrap_or('?'),
                };
                (c.to_string(), false)
            }
            's' | 'S' => {
                let mut text = arg.display(language);
                if let Some(p) = precision {
                    text = text.chars().take(p).collect();
                }
                if conversion == 'S' {
                    text = text.to_uppercase();
                }
                (text, false)
            }
            'r' if language == Language::Python => (arg.repr(language), false),
            'b' if language == Language::Java => (arg.truthy().to_string(), false),
            'p' => ("0x0".to_string(), false),
            other => return Err(format!("unsupported format character '{}'", other)),
        };

        let width = field_size(&width)?;
        out.push_str(&pad(&body, width, left, zero && numeric));
    }
    Ok(out)
}

fn with_sign(text: String, sign: &str) -> String {
    if text.starts_with('-') || sign.is_empty() {
        text
    } else {
        format!("{}{}", sign, text)
    }
}

fn pad(body: &str, width: usize, left: bool, zero: bool) -> String {
    let len = body.chars().count();
    if len >= width {
        return body.to_string();
    }
    let fill = width - len;
    if left {
        format!("{}{}", body, " ".repeat(fill))
    } else if zero {
        let (sign, digits) = match body.strip_prefix(['-', '+', ' ']) {
            Some(rest) => (&body[..1], rest),
            None => ("", body),
        };
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}", " ".repeat(fill), body)
    }
}

/// A parsed `[[fill]align][sign][#][0][width][,][.precision][type]` spec,
/// shared by python format specs and rust format strings.
#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Result<Spec, String> {
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut parsed = Spec::default();

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
        parsed.sign = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '#' {
        parsed.alternate = true;
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' {
        parsed.zero = true;
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        parsed.width = field_size(&chars[start..i].iter().collect::<String>())?;
    }
    if i < chars.len() && matches!(chars[i], ',' | '_') {
        parsed.grouping = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        parsed.precision = Some(field_size(&chars[start..i].iter().collect::<String>())?);
    }
    if i < chars.len() {
        parsed.kind = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() {
        return Err(format!("invalid format specifier '{}'", spec));
    }
    Ok(parsed)
}

fn group_digits(digits: &str, separator: char) -> String {
    let (sign, rest) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let (int_part, frac) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };
    let mut grouped = String::new();
    for (n, c) in int_part.chars().enumerate() {
        if n > 0 && (int_part.len() - n) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }
    match frac {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

/// Render one value under a format spec.
pub fn apply_spec(value: &Value, spec: &str, language: Language) -> Result<String, String> {
    let value = value.deref();
    let spec = parse_spec(spec)?;
    let is_number = matches!(value, Value::Int(_) | Value::Float(_));

    let mut body = match (spec.kind, &value) {
        (Some('?'), v) => v.repr(language),
        (Some('d'), v) => int_arg(v)?.to_string(),
        (Some('b'), v) => {
            let n = int_arg(v)?;
            let prefix = if spec.alternate { "0b" } else { "" };
            format!("{}{}{:b}", if n < 0 { "-" } else { "" }, prefix, n.unsigned_abs())
        }
        (Some('o'), v) => format!("{:o}", int_arg(v)?),
        (Some('x'), v) => {
            let prefix = if spec.alternate { "0x" } else { "" };
            format!("{}{:x}", prefix, int_arg(v)?)
        }
        (Some('X'), v) => format!("{:X}", int_arg(v)?),
        (Some('c'), v) => char::from_u32(int_arg(v)? as u32).unwrap_or('?').to_string(),
        (Some('f') | Some('F'), v) => format!("{:.*}", spec.precision.unwrap_or(6), float_arg(v)?),
        (Some('e') | Some('E'), v) if language == Language::Rust => {
            let text = match spec.precision {
                Some(p) => format!("{:.*e}", p, float_arg(v)?),
                None => format!("{:e}", float_arg(v)?),
            };
            if spec.kind == Some('E') {
                text.to_uppercase()
            } else {
                text
            }
        }
        (Some('e') | Some('E'), v) => {
            format_exponent(float_arg(v)?, spec.precision.unwrap_or(6), spec.kind == Some('E'))
        }
        (Some('g') | Some('G'), v) => format_general(float_arg(v)?, spec.precision.unwrap_or(6), spec.kind == Some('G')),
        (Some('%'), v) => format!("{:.*}%", spec.precision.unwrap_or(6), float_arg(v)? * 100.0),
        (Some('s') | None, Value::Float(f)) if spec.precision.is_some() => {
            let p = spec.precision.unwrap_or(6);
            if language == Language::Python {
                format_general(*f, p, false)
            } else {
                format!("{:.*}", p, f)
            }
        }
        (Some('s') | None, Value::Int(i)) if spec.precision.is_some() && language == Language::Rust => {
            i.to_string()
        }
        (Some('s') | None, v) => {
            let text = v.display(language);
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        (Some(other), _) => return Err(format!("unknown format code '{}'", other)),
    };

    if let Some(separator) = spec.grouping {
        body = group_digits(&body, separator);
    }
    if let Some(sign @ ('+' | ' ')) = spec.sign {
        if is_number && !body.starts_with('-') {
            body = format!("{}{}", sign, body);
        }
    }

    let len = body.chars().count();
    if len >= spec.width {
        return Ok(body);
    }
    let padding = spec.width - len;
    if spec.zero && spec.align.is_none() && is_number {
        return Ok(pad(&body, spec.width, false, true));
    }
    let fill = spec.fill.unwrap_or(' ');
    let align = spec.align.unwrap_or(if is_number { '>' } else { '<' });
    let repeat = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '<' => format!("{}{}", body, repeat(padding)),
        '^' => format!("{}{}{}", repeat(padding / 2), body, repeat(padding - padding / 2)),
        '=' => pad(&body, spec.width, false, true),
        _ => format!("{}{}", repeat(padding), body),
    })
}

/// Which argument a replacement field names.
enum FieldRef<'a> {
    Next,
    Index(usize),
    Name(&'a str),
}

/// Shared `{}` template walker for python `str.format` and rust macros.
fn replace_fields<'t>(
    template: &'t str,
    mut render: impl FnMut(FieldRef<'t>, &'t str, bool) -> Result<String, String>,
) -> Result<String, String> {
    let mut out = String::new();
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            return Err("single '}' encountered in format string".to_string());
        }
        let close = tail.find('}').ok_or("single '{' encountered in format string")?;
        let field = &tail[1..close];
        let (name, spec) = field.split_once(':').unwrap_or((field, ""));
        let (name, repr) = match name.split_once('!') {
            Some((n, conv)) => (n, conv == "r"),
            None => (name, false),
        };
        let name = name.trim();
        let reference = if name.is_empty() {
            FieldRef::Next
        } else if let Ok(index) = name.parse::<usize>() {
            FieldRef::Index(index)
        } else {
            FieldRef::Name(name)
        };
        out.push_str(&render(reference, spec, repr)?);
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// python `str.format`
pub fn python_format(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<String, String> {
    let mut next = 0;
    replace_fields(template, |reference, spec, repr| {
        let value = match reference {
            FieldRef::Next => {
                next += 1;
                args.get(next - 1)
            }
            FieldRef::Index(i) => args.get(i),
            FieldRef::Name(n) => kwargs.iter().find(|(k, _)| k == n).map(|(_, v)| v),
        }
        .ok_or("Replacement index out of range for positional args tuple")?;
        if repr {
            Ok(value.repr(Language::Python))
        } else {
            apply_spec(value, spec, Language::Python)
        }
    })
}

/// rust `format!` family. Named fields are looked up through `lookup`.
pub fn rust_format(
    template: &str,
    args: &[Value],
    lookup: &dyn Fn(&str) -> Option<Value>,
) -> Result<String, String> {
    let mut next = 0;
    replace_fields(template, |reference, spec, _| {
        let value = match reference {
            FieldRef::Next => {
                next += 1;
                args.get(next - 1).cloned()
            }
            FieldRef::Index(i) => args.get(i).cloned(),
            FieldRef::Name(n) => lookup(n),
        }
        .ok_or("missing format argument")?;
        apply_spec(&value, spec, Language::Rust)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printf_directives() {
        let args = [Value::Int(42), Value::Float(3.14159), Value::str("hi"), Value::Int(65)];
        let out = printf("%5d|%-4d|%.2f|%s|%c|%%", &[args[0].clone(), args[0].clone(), args[1].clone(), args[2].clone(), args[3].clone()], Language::C).unwrap();
        assert_eq!(out, "   42|42  |3.14|hi|A|%");
        assert_eq!(printf("%05.1f", &[Value::Float(-2.5)], Language::C).unwrap(), "-02.5");
        assert_eq!(printf("%x %o", &[Value::Int(255), Value::Int(8)], Language::C).unwrap(), "ff 10");
        assert!(printf("%d %d", &[Value::Int(1)], Language::C).is_err());
    }

    #[test]
    fn test_oversized_fields_rejected() {
        assert!(printf("%999999999999d", &[Value::Int(1)], Language::C).is_err());
        assert!(printf("%*d", &[Value::Int(1_000_000_000), Value::Int(1)], Language::C).is_err());
        assert!(printf("%.100000000f", &[Value::Float(1.0)], Language::C).is_err());
        assert_eq!(printf("%*d|", &[Value::Int(-3), Value::Int(7)], Language::C).unwrap(), "7|");
        assert!(apply_spec(&Value::Int(1), ">100000000", Language::Python).is_err());
    }

    #[test]
    fn test_general_and_exponent() {
        assert_eq!(format_general(0.5, 6, false), "0.5");
        assert_eq!(format_general(100000.0, 6, false), "100000");
        assert_eq!(format_general(1234567.0, 6, false), "1.23457e+06");
        assert_eq!(format_general(0.0001, 6, false), "0.0001");
        assert_eq!(format_exponent(150.0, 2, false), "1.50e+02");
    }

    #[test]
    fn test_python_specs() {
        assert_eq!(apply_spec(&Value::Float(3.14159), ".2f", Language::Python).unwrap(), "3.14");
        assert_eq!(apply_spec(&Value::Int(42), ">5", Language::Python).unwrap(), "   42");
        assert_eq!(apply_spec(&Value::str("ab"), "*^6", Language::Python).unwrap(), "**ab**");
        assert_eq!(apply_spec(&Value::Int(1234567), ",", Language::Python).unwrap(), "1,234,567");
        assert_eq!(apply_spec(&Value::Int(7), "03d", Language::Python).unwrap(), "007");
        let out = python_format("{} + {1} = {total}", &[Value::Int(1), Value::Int(2)], &[("total".into(), Value::Int(3))]).unwrap();
        assert_eq!(out, "1 + 2 = 3");
    }

    #[test]
    fn test_rust_format() {
        let lookup = |name: &str| (name == "x").then(|| Value::Int(9));
        let args = [Value::Float(2.0), Value::list(vec![Value::Int(1)])];
        let out = rust_format("{} {:?} {x} {{}} {:.2}", &[args[0].clone(), args[1].clone(), Value::Float(1.0)], &lookup).unwrap();
        assert_eq!(out, "2 [1] 9 {} 1.00");
    }
}
