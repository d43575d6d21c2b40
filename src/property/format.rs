//! Numeric format strings and literal parsing for Number elements.
//!
//! A Number element declares either a printf-style format (`%6.2f`, `%g`,
//! `%d`, ...) or the protocol's own sexagesimal specifier `%<w>.<f>m` where
//! the fraction digit selects the sexagesimal layout:
//!
//! ```text
//! %.9m  ->  :mm:ss.ss
//! %.8m  ->  :mm:ss.s
//! %.6m  ->  :mm:ss
//! %.5m  ->  :mm.m
//! %.3m  ->  :mm
//! ```
//!
//! Wire literals may be integer, real, or sexagesimal with space, colon, or
//! semicolon separators; all three normalize to an f64.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Parsed printf-style format pieces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintfSpec {
    /// `-` flag: left-justify within the field width
    pub left: bool,
    /// `0` flag: pad with zeros after the sign
    pub zero: bool,
    /// `+` flag: always emit a sign
    pub plus: bool,
    /// Minimum field width
    pub width: Option<usize>,
    /// Precision (digits after the point, or rounding for `g`)
    pub precision: Option<usize>,
    /// Conversion character: one of `f e E g G d i x X o`
    pub conv: char,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum FormatKind {
    Printf(PrintfSpec),
    Sexagesimal { width: usize, frac: u8 },
}

/// A Number element's declared display format; keeps the original text so
/// definitions round-trip byte-for-byte
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberFormat {
    raw: String,
    kind: FormatKind,
}

impl PartialEq for NumberFormat {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Default for NumberFormat {
    fn default() -> Self {
        "%g".parse().expect("default format is valid")
    }
}

impl NumberFormat {
    /// Returns true for the sexagesimal path
    pub fn is_sexagesimal(&self) -> bool {
        matches!(self.kind, FormatKind::Sexagesimal { .. })
    }

    /// Renders a value according to this format
    pub fn format(&self, value: f64) -> String {
        match &self.kind {
            FormatKind::Printf(spec) => format_printf(spec, value),
            FormatKind::Sexagesimal { width, frac } => format_sexa(value, *width, *frac),
        }
    }
}

impl FromStr for NumberFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('%')
            .ok_or_else(|| Error::invalid_spec(format!("number format '{}' must start with %", s)))?;
        if body.is_empty() {
            return Err(Error::invalid_spec("empty number format"));
        }

        let mut chars = body.chars().peekable();
        let mut left = false;
        let mut zero = false;
        let mut plus = false;
        while let Some(&c) = chars.peek() {
            match c {
                '-' => left = true,
                '0' => zero = true,
                '+' => plus = true,
                ' ' => {}
                _ => break,
            }
            chars.next();
        }

        let mut width_digits = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                width_digits.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let width = if width_digits.is_empty() {
            None
        } else {
            Some(width_digits.parse().map_err(|_| {
                Error::invalid_spec(format!("bad width in number format '{}'", s))
            })?)
        };

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut prec_digits = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    prec_digits.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            precision = Some(prec_digits.parse().unwrap_or(0));
        }

        let conv = chars
            .next()
            .ok_or_else(|| Error::invalid_spec(format!("number format '{}' has no conversion", s)))?;
        if chars.next().is_some() {
            return Err(Error::invalid_spec(format!(
                "trailing characters in number format '{}'",
                s
            )));
        }

        let kind = match conv {
            'm' => {
                let frac = precision
                    .ok_or_else(|| Error::invalid_spec("sexagesimal format needs a fraction"))?;
                if !matches!(frac, 3 | 5 | 6 | 8 | 9) {
                    return Err(Error::invalid_spec(format!(
                        "sexagesimal fraction must be one of 3,5,6,8,9, got {}",
                        frac
                    )));
                }
                FormatKind::Sexagesimal {
                    width: width.unwrap_or(0),
                    frac: frac as u8,
                }
            }
            'f' | 'e' | 'E' | 'g' | 'G' | 'd' | 'i' | 'x' | 'X' | 'o' => {
                FormatKind::Printf(PrintfSpec {
                    left,
                    zero,
                    plus,
                    width,
                    precision,
                    conv,
                })
            }
            other => {
                return Err(Error::invalid_spec(format!(
                    "unsupported conversion '{}' in number format '{}'",
                    other, s
                )))
            }
        };

        Ok(NumberFormat {
            raw: s.to_string(),
            kind,
        })
    }
}

impl fmt::Display for NumberFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn format_printf(spec: &PrintfSpec, value: f64) -> String {
    let body = match spec.conv {
        'f' => format!("{:.*}", spec.precision.unwrap_or(6), value),
        'e' => format!("{:.*e}", spec.precision.unwrap_or(6), value),
        'E' => format!("{:.*E}", spec.precision.unwrap_or(6), value),
        // Shortest round-trip rendering stands in for C's %g
        'g' | 'G' => format!("{}", value),
        'd' | 'i' => format!("{}", value.round() as i64),
        'x' => format!("{:x}", value.round() as i64),
        'X' => format!("{:X}", value.round() as i64),
        'o' => format!("{:o}", value.round() as i64),
        _ => unreachable!("validated at parse time"),
    };

    let body = if spec.plus && value >= 0.0 && !body.starts_with('+') {
        format!("+{}", body)
    } else {
        body
    };

    let width = spec.width.unwrap_or(0);
    if body.len() >= width {
        return body;
    }
    if spec.left {
        format!("{:<width$}", body, width = width)
    } else if spec.zero {
        // Zero padding goes after the sign
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => match body.strip_prefix('+') {
                Some(rest) => ("+", rest),
                None => ("", body.as_str()),
            },
        };
        format!("{}{:0>pad$}", sign, digits, pad = width - sign.len())
    } else {
        format!("{:>width$}", body, width = width)
    }
}

/// Renders a value in sexagesimal notation; `width` is the minimum field
/// width of the leading whole part including its sign
fn format_sexa(value: f64, width: usize, frac: u8) -> String {
    let fracbase: i64 = match frac {
        3 => 60,
        5 => 600,
        6 => 3_600,
        8 => 36_000,
        9 => 360_000,
        _ => unreachable!("validated at parse time"),
    };

    let n = (value.abs() * fracbase as f64).round() as i64;
    let whole = n / fracbase;
    let f = n % fracbase;

    let negative = value.is_sign_negative() && (whole > 0 || f > 0);
    let lead = if negative {
        format!("-{}", whole)
    } else {
        format!("{}", whole)
    };
    let mut out = format!("{:>width$}", lead, width = width);

    match fracbase {
        60 => out.push_str(&format!(":{:02}", f)),
        600 => out.push_str(&format!(":{:02}.{}", f / 10, f % 10)),
        3_600 => out.push_str(&format!(":{:02}:{:02}", f / 60, f % 60)),
        36_000 => {
            let rem = f % 600;
            out.push_str(&format!(":{:02}:{:02}.{}", f / 600, rem / 10, rem % 10));
        }
        360_000 => {
            let rem = f % 6_000;
            out.push_str(&format!(":{:02}:{:02}.{:02}", f / 6_000, rem / 100, rem % 100));
        }
        _ => unreachable!(),
    }
    out
}

/// Parses a wire numeric literal: integer, real, or sexagesimal with
/// space/colon/semicolon separators
pub fn parse_number(s: &str) -> Result<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::parse("empty numeric literal"));
    }

    let is_sep = |c: char| c == ':' || c == ';' || c.is_whitespace();
    if !s.contains(is_sep) {
        return s
            .parse::<f64>()
            .map_err(|e| Error::parse(format!("bad numeric literal '{}': {}", s, e)));
    }

    let negative = s.starts_with('-');
    let unsigned = s.trim_start_matches(['-', '+']);
    let parts: Vec<&str> = unsigned.split(is_sep).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(Error::parse(format!("bad sexagesimal literal '{}'", s)));
    }

    let mut value = 0.0;
    let mut scale = 1.0;
    for part in &parts {
        let v: f64 = part
            .parse()
            .map_err(|e| Error::parse(format!("bad sexagesimal component '{}': {}", part, e)))?;
        if v < 0.0 {
            return Err(Error::parse(format!(
                "sign inside sexagesimal literal '{}'",
                s
            )));
        }
        value += v / scale;
        scale *= 60.0;
    }

    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(s: &str) -> NumberFormat {
        s.parse().unwrap()
    }

    #[test]
    fn test_format_round_trips_raw_text() {
        for s in ["%g", "%6.2f", "%d", "%08.4f", "%-10.3e", "%9.6m", "%.3m"] {
            assert_eq!(fmt(s).to_string(), s);
        }
    }

    #[test]
    fn test_invalid_formats_rejected() {
        assert!("6.2f".parse::<NumberFormat>().is_err());
        assert!("%q".parse::<NumberFormat>().is_err());
        assert!("%m".parse::<NumberFormat>().is_err());
        assert!("%.4m".parse::<NumberFormat>().is_err());
        assert!("%6.2ff".parse::<NumberFormat>().is_err());
    }

    #[test]
    fn test_printf_fixed() {
        assert_eq!(fmt("%6.2f").format(3.14159), "  3.14");
        assert_eq!(fmt("%.0f").format(2.5), "2");
        assert_eq!(fmt("%08.3f").format(-1.5), "-001.500");
        assert_eq!(fmt("%-6.1f").format(1.0), "1.0   ");
        assert_eq!(fmt("%+.1f").format(2.0), "+2.0");
        assert_eq!(fmt("%d").format(42.4), "42");
    }

    #[test]
    fn test_sexa_layouts() {
        assert_eq!(fmt("%2.6m").format(12.5125), "12:30:45");
        assert_eq!(fmt("%2.3m").format(12.5125), "12:31");
        assert_eq!(fmt("%2.5m").format(12.5125), "12:30.8");
        assert_eq!(fmt("%2.8m").format(12.5125), "12:30:45.0");
        assert_eq!(fmt("%2.9m").format(12.5125), "12:30:45.00");
    }

    #[test]
    fn test_sexa_negative_below_one() {
        // The sign must survive a zero whole part
        assert_eq!(fmt("%3.3m").format(-0.5), " -0:30");
        assert_eq!(fmt("%3.6m").format(-0.5), " -0:30:00");
    }

    #[test]
    fn test_sexa_width_padding() {
        assert_eq!(fmt("%9.6m").format(5.25), "        5:15:00");
    }

    #[test]
    fn test_parse_plain_numbers() {
        assert_eq!(parse_number("42").unwrap(), 42.0);
        assert_eq!(parse_number("-3.5").unwrap(), -3.5);
        assert_eq!(parse_number(" 1e3 ").unwrap(), 1000.0);
        assert!(parse_number("").is_err());
        assert!(parse_number("abc").is_err());
    }

    #[test]
    fn test_parse_sexagesimal() {
        assert_eq!(parse_number("12:30:45").unwrap(), 12.5125);
        assert_eq!(parse_number("12 30 45").unwrap(), 12.5125);
        assert_eq!(parse_number("12;30;45").unwrap(), 12.5125);
        assert_eq!(parse_number("12:30").unwrap(), 12.5);
        assert_eq!(parse_number("-0:30").unwrap(), -0.5);
        assert_eq!(parse_number("-12:30:45").unwrap(), -12.5125);
    }

    #[test]
    fn test_sexa_round_trip_at_declared_precision() {
        let f = fmt("%2.9m");
        for v in [0.0, 12.5125, -3.999, 89.99999] {
            let shown = f.format(v);
            let back = parse_number(&shown).unwrap();
            // :mm:ss.ss resolves 1/360000 of a unit
            assert!((back - v).abs() <= 0.5 / 360_000.0, "{} -> {} -> {}", v, shown, back);
        }
    }
}
