/// Format a float as a yuan amount with thousands separators: ¥1,234.56
pub fn money(val: f64) -> String {
    let negative = val < 0.0;
    let cents = format!("{:.2}", val.abs());
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-¥{with_commas}.{dec_part}")
    } else {
        format!("¥{with_commas}.{dec_part}")
    }
}

/// Quantities print without a fractional part when they are whole.
pub fn quantity(val: f64) -> String {
    crate::grid::format_number((val * 1000.0).round() / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(1234.56), "¥1,234.56");
        assert_eq!(money(-500.00), "-¥500.00");
        assert_eq!(money(0.0), "¥0.00");
        assert_eq!(money(1000000.99), "¥1,000,000.99");
    }

    #[test]
    fn test_quantity_formatting() {
        assert_eq!(quantity(15.0), "15");
        assert_eq!(quantity(2.5), "2.5");
    }
}
