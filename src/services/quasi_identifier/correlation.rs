//! Pairwise column correlation: Pearson r for numeric pairs, Cramér's V
//! from a contingency table when either side is categorical. Callers use
//! the absolute value in both cases.

use std::collections::HashMap;

/// Row-align two sampled columns, dropping positions where either is null
pub fn paired_values<'a>(
    a: &'a [Option<String>],
    b: &'a [Option<String>],
) -> Vec<(&'a str, &'a str)> {
    a.iter()
        .zip(b.iter())
        .filter_map(|(x, y)| match (x.as_deref(), y.as_deref()) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        })
        .collect()
}

/// Pearson correlation coefficient. Degenerate inputs (fewer than two
/// points, zero variance) yield 0.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;

    let mean_x = xs[..n].iter().sum::<f64>() / n_f;
    let mean_y = ys[..n].iter().sum::<f64>() / n_f;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Cramér's V over the contingency table of two categorical columns.
/// Ranges [0, 1]; degenerate tables (a single row or column) yield 0.
pub fn cramers_v(pairs: &[(&str, &str)]) -> f64 {
    let n = pairs.len();
    if n < 2 {
        return 0.0;
    }

    let mut row_index: HashMap<&str, usize> = HashMap::new();
    let mut col_index: HashMap<&str, usize> = HashMap::new();
    for &(a, b) in pairs {
        let next = row_index.len();
        row_index.entry(a).or_insert(next);
        let next = col_index.len();
        col_index.entry(b).or_insert(next);
    }

    let rows = row_index.len();
    let cols = col_index.len();
    if rows < 2 || cols < 2 {
        return 0.0;
    }

    let mut table = vec![vec![0usize; cols]; rows];
    for &(a, b) in pairs {
        table[row_index[a]][col_index[b]] += 1;
    }

    let row_totals: Vec<usize> = table.iter().map(|r| r.iter().sum()).collect();
    let mut col_totals = vec![0usize; cols];
    for row in &table {
        for (j, &count) in row.iter().enumerate() {
            col_totals[j] += count;
        }
    }

    let n_f = n as f64;
    let mut chi2 = 0.0;
    for (i, row) in table.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            let expected = row_totals[i] as f64 * col_totals[j] as f64 / n_f;
            if expected > 0.0 {
                let diff = observed as f64 - expected;
                chi2 += diff * diff / expected;
            }
        }
    }

    let denom = n_f * (rows.min(cols) - 1) as f64;
    if denom == 0.0 {
        return 0.0;
    }
    (chi2 / denom).sqrt().min(1.0)
}

/// Try to interpret every paired value as numeric
pub fn numeric_pairs(pairs: &[(&str, &str)]) -> Option<(Vec<f64>, Vec<f64>)> {
    let mut xs = Vec::with_capacity(pairs.len());
    let mut ys = Vec::with_capacity(pairs.len());
    for &(a, b) in pairs {
        xs.push(a.trim().parse::<f64>().ok()?);
        ys.push(b.trim().parse::<f64>().ok()?);
    }
    Some((xs, ys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_detects_perfect_linear_relation() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson(&xs, &ys) - 1.0).abs() < 1e-9);

        let neg: Vec<f64> = ys.iter().map(|y| -y).collect();
        assert!((pearson(&xs, &neg) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_of_constant_series_is_zero() {
        let xs = [3.0, 3.0, 3.0];
        let ys = [1.0, 2.0, 3.0];
        assert_eq!(pearson(&xs, &ys), 0.0);
    }

    #[test]
    fn cramers_v_of_identical_categories_is_one() {
        let pairs: Vec<(&str, &str)> = vec![
            ("a", "x"),
            ("a", "x"),
            ("b", "y"),
            ("b", "y"),
            ("c", "z"),
            ("c", "z"),
        ];
        assert!((cramers_v(&pairs) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cramers_v_of_independent_categories_is_low() {
        // Every combination equally often: no association
        let pairs: Vec<(&str, &str)> = vec![
            ("a", "x"),
            ("a", "y"),
            ("b", "x"),
            ("b", "y"),
            ("a", "x"),
            ("a", "y"),
            ("b", "x"),
            ("b", "y"),
        ];
        assert!(cramers_v(&pairs) < 1e-9);
    }

    #[test]
    fn degenerate_tables_yield_zero() {
        let single_row: Vec<(&str, &str)> = vec![("a", "x"), ("a", "y"), ("a", "z")];
        assert_eq!(cramers_v(&single_row), 0.0);
        assert_eq!(cramers_v(&[]), 0.0);
    }

    #[test]
    fn paired_values_skips_nulls() {
        let a = vec![Some("1".to_string()), None, Some("3".to_string())];
        let b = vec![Some("x".to_string()), Some("y".to_string()), None];
        let pairs = paired_values(&a, &b);
        assert_eq!(pairs, vec![("1", "x")]);
    }

    #[test]
    fn numeric_pairs_requires_all_parseable() {
        let pairs = vec![("1", "2.5"), ("3", "4")];
        let (xs, ys) = numeric_pairs(&pairs).unwrap();
        assert_eq!(xs, vec![1.0, 3.0]);
        assert_eq!(ys, vec![2.5, 4.0]);

        assert!(numeric_pairs(&[("1", "two")]).is_none());
    }
}
