use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::models::{ForecastMethod, Horizon, METRIC_DECIMAL_PLACES};
use crate::time_utils::{days_in_month, BillingPeriod};

/// Per-run inputs that every company's forecast shares.
#[derive(Debug, Clone, Copy)]
pub struct ForecastContext {
    pub method: ForecastMethod,
    pub horizon: Horizon,
    /// Billing period the data date belongs to.
    pub period: BillingPeriod,
    /// The day being reported on.
    pub data_date: NaiveDate,
}

impl ForecastContext {
    pub fn new(method: ForecastMethod, horizon: Horizon, data_date: NaiveDate) -> Self {
        Self {
            method,
            horizon,
            period: BillingPeriod::containing(data_date),
            data_date,
        }
    }
}

// ── UsageForecaster ───────────────────────────────────────────────────────────

/// Stateless collection of forecast calculations.
pub struct UsageForecaster;

impl UsageForecaster {
    /// Forecast one company's usage from its per-day totals.
    ///
    /// `daily` maps each observed day to the company's total CPUs that day.
    /// Returns zero for an empty series. The result is never negative and is
    /// rounded to [`METRIC_DECIMAL_PLACES`].
    ///
    /// `Trend` with [`Horizon::PeriodEnd`] is a billing-period total: the
    /// usage so far plus the fitted daily usage of every day left after the
    /// data date. [`Horizon::LastObserved`] gives the fitted daily rate on the
    /// company's latest day instead.
    pub fn forecast(daily: &BTreeMap<NaiveDate, Decimal>, ctx: &ForecastContext) -> Decimal {
        let Some((&last_day, _)) = daily.last_key_value() else {
            return Decimal::ZERO;
        };

        match ctx.method {
            ForecastMethod::Trend => match ctx.horizon {
                Horizon::PeriodEnd => Self::period_total(daily, ctx.data_date, ctx.period.end),
                Horizon::LastObserved => Self::trend(daily, last_day),
            },
            ForecastMethod::MonthEnd => {
                let cumulative: Decimal = daily.values().copied().sum();
                Self::month_end(cumulative, ctx.data_date)
            }
        }
    }

    /// Least-squares linear projection of daily usage evaluated at `target`.
    ///
    /// With a single observed day the slope is undefined, so that day's value
    /// is used as the flat rate.
    pub fn trend(daily: &BTreeMap<NaiveDate, Decimal>, target: NaiveDate) -> Decimal {
        let Some(line) = DailyTrend::fit(daily) else {
            return Decimal::ZERO;
        };
        Decimal::from_f64(line.at(target))
            .unwrap_or(Decimal::ZERO)
            .round_dp(METRIC_DECIMAL_PLACES)
    }

    /// Observed usage plus the projected usage of `(data_date, period_end]`.
    ///
    /// Days between the company's last observation and `data_date` count as
    /// already elapsed and are not projected.
    pub fn period_total(
        daily: &BTreeMap<NaiveDate, Decimal>,
        data_date: NaiveDate,
        period_end: NaiveDate,
    ) -> Decimal {
        let Some(line) = DailyTrend::fit(daily) else {
            return Decimal::ZERO;
        };
        let observed: Decimal = daily.values().copied().sum();

        let projected: f64 = data_date
            .iter_days()
            .skip(1)
            .take_while(|day| *day <= period_end)
            .map(|day| line.at(day))
            .sum();
        let projected = Decimal::from_f64(projected).unwrap_or(Decimal::ZERO);

        observed
            .checked_add(projected)
            .unwrap_or(Decimal::MAX)
            .max(Decimal::ZERO)
            .round_dp(METRIC_DECIMAL_PLACES)
    }

    /// Scale a month-to-date total to the whole month of `data_date`.
    ///
    /// `cumulative / day_of_month × days_in_month`, computed in decimal.
    pub fn month_end(cumulative: Decimal, data_date: NaiveDate) -> Decimal {
        let days_passed = Decimal::from(data_date.day());
        let month_days = Decimal::from(days_in_month(data_date.year(), data_date.month()));

        let average_daily = cumulative
            .checked_div(days_passed)
            .unwrap_or(Decimal::ZERO);
        average_daily
            .checked_mul(month_days)
            .unwrap_or(Decimal::MAX)
            .max(Decimal::ZERO)
            .round_dp(METRIC_DECIMAL_PLACES)
    }
}

/// Straight line through a company's daily totals, in days from its first
/// observation.
#[derive(Debug, Clone, Copy)]
struct DailyTrend {
    origin: NaiveDate,
    slope: f64,
    intercept: f64,
}

impl DailyTrend {
    /// `None` for an empty series. A single day, or a series the fit cannot
    /// handle, becomes a flat line at the first day's value.
    fn fit(daily: &BTreeMap<NaiveDate, Decimal>) -> Option<Self> {
        let (&origin, first_value) = daily.first_key_value()?;
        let flat = Self {
            origin,
            slope: 0.0,
            intercept: first_value.to_f64().unwrap_or(0.0),
        };
        if daily.len() == 1 {
            return Some(flat);
        }

        let points: Vec<(f64, f64)> = daily
            .iter()
            .map(|(day, value)| {
                (
                    (*day - origin).num_days() as f64,
                    value.to_f64().unwrap_or(0.0),
                )
            })
            .collect();

        Some(match linear_fit(&points) {
            Some((slope, intercept)) => Self {
                origin,
                slope,
                intercept,
            },
            None => flat,
        })
    }

    /// Fitted usage on `day`, clamped at zero.
    fn at(&self, day: NaiveDate) -> f64 {
        let x = (day - self.origin).num_days() as f64;
        (self.intercept + self.slope * x).max(0.0)
    }
}

/// Ordinary least squares over `(x, y)` points.
///
/// Returns `(slope, intercept)`, or `None` when every `x` is identical.
fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, y) in points {
        covariance += (x - mean_x) * (y - mean_y);
        variance += (x - mean_x) * (x - mean_x);
    }
    if variance == 0.0 {
        return None;
    }

    let slope = covariance / variance;
    Some((slope, mean_y - slope * mean_x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series(values: &[(u32, Decimal)]) -> BTreeMap<NaiveDate, Decimal> {
        values.iter().map(|(day, v)| (d(2024, 1, *day), *v)).collect()
    }

    // ── trend ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_trend_empty_is_zero() {
        assert_eq!(
            UsageForecaster::trend(&BTreeMap::new(), d(2024, 1, 31)),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_trend_single_point_is_flat() {
        let daily = series(&[(10, dec!(5))]);
        assert_eq!(UsageForecaster::trend(&daily, d(2024, 1, 31)), dec!(5));
        assert_eq!(UsageForecaster::trend(&daily, d(2024, 1, 10)), dec!(5));
    }

    #[test]
    fn test_trend_rising_series_at_last_day() {
        let daily = series(&[(1, dec!(1)), (2, dec!(2)), (3, dec!(3))]);
        assert_eq!(UsageForecaster::trend(&daily, d(2024, 1, 3)), dec!(3));
    }

    #[test]
    fn test_trend_rising_series_at_month_end() {
        let daily = series(&[(1, dec!(1)), (2, dec!(2)), (3, dec!(3))]);
        assert_eq!(UsageForecaster::trend(&daily, d(2024, 1, 31)), dec!(31));
    }

    #[test]
    fn test_trend_flat_series() {
        let daily = series(&[(1, dec!(8)), (4, dec!(8)), (9, dec!(8))]);
        assert_eq!(UsageForecaster::trend(&daily, d(2024, 1, 31)), dec!(8));
    }

    #[test]
    fn test_trend_clamps_negative_projection() {
        let daily = series(&[(1, dec!(10)), (2, dec!(5)), (3, dec!(0))]);
        assert_eq!(
            UsageForecaster::trend(&daily, d(2024, 1, 31)),
            Decimal::ZERO
        );
    }

    // ── period_total ──────────────────────────────────────────────────────────

    #[test]
    fn test_period_total_flat_usage_matches_month_end() {
        let daily: BTreeMap<NaiveDate, Decimal> =
            (1..=20).map(|day| (d(2024, 1, day), dec!(100))).collect();
        let total = UsageForecaster::period_total(&daily, d(2024, 1, 20), d(2024, 1, 31));

        assert_eq!(total, dec!(3100));
        assert_eq!(total, UsageForecaster::month_end(dec!(2000), d(2024, 1, 20)));
    }

    #[test]
    fn test_period_total_never_below_cumulative() {
        let falling = series(&[(1, dec!(10)), (2, dec!(5)), (3, dec!(0))]);
        assert_eq!(
            UsageForecaster::period_total(&falling, d(2024, 1, 3), d(2024, 1, 31)),
            dec!(15)
        );
    }

    #[test]
    fn test_period_total_on_last_day_is_cumulative() {
        let daily = series(&[(30, dec!(4)), (31, dec!(6))]);
        assert_eq!(
            UsageForecaster::period_total(&daily, d(2024, 1, 31), d(2024, 1, 31)),
            dec!(10)
        );
    }

    #[test]
    fn test_period_total_single_point_is_the_rate() {
        let daily = series(&[(5, dec!(5))]);
        assert_eq!(
            UsageForecaster::period_total(&daily, d(2024, 1, 5), d(2024, 1, 31)),
            dec!(135)
        );
    }

    #[test]
    fn test_period_total_skips_elapsed_days() {
        // Last seen on the 2nd, reported on the 29th: only the 30th and 31st
        // are projected.
        let daily = series(&[(1, dec!(3)), (2, dec!(3))]);
        assert_eq!(
            UsageForecaster::period_total(&daily, d(2024, 1, 29), d(2024, 1, 31)),
            dec!(12)
        );
    }

    // ── month_end ─────────────────────────────────────────────────────────────

    #[test]
    fn test_month_end_scales_month_to_date() {
        // 6 CPUs over the first 3 days of a 31-day month.
        assert_eq!(UsageForecaster::month_end(dec!(6), d(2024, 1, 3)), dec!(62));
    }

    #[test]
    fn test_month_end_rounds_to_cents() {
        assert_eq!(
            UsageForecaster::month_end(dec!(10), d(2024, 1, 3)),
            dec!(103.33)
        );
    }

    #[test]
    fn test_month_end_last_day_equals_cumulative() {
        assert_eq!(
            UsageForecaster::month_end(dec!(290), d(2024, 2, 29)),
            dec!(290)
        );
    }

    // ── forecast dispatch ─────────────────────────────────────────────────────

    #[test]
    fn test_forecast_uses_horizon() {
        let daily = series(&[(1, dec!(1)), (2, dec!(2)), (3, dec!(3))]);
        let at_end = ForecastContext::new(ForecastMethod::Trend, Horizon::PeriodEnd, d(2024, 1, 3));
        let at_last = ForecastContext::new(
            ForecastMethod::Trend,
            Horizon::LastObserved,
            d(2024, 1, 3),
        );
        // 6 so far plus 4 + 5 + ... + 31 for the rest of January.
        assert_eq!(UsageForecaster::forecast(&daily, &at_end), dec!(496));
        assert_eq!(UsageForecaster::forecast(&daily, &at_last), dec!(3));
    }

    #[test]
    fn test_forecast_month_end_method() {
        let daily = series(&[(1, dec!(1)), (2, dec!(2)), (3, dec!(3))]);
        let ctx = ForecastContext::new(ForecastMethod::MonthEnd, Horizon::PeriodEnd, d(2024, 1, 3));
        assert_eq!(UsageForecaster::forecast(&daily, &ctx), dec!(62));
    }

    #[test]
    fn test_forecast_empty_series() {
        let ctx = ForecastContext::new(ForecastMethod::Trend, Horizon::PeriodEnd, d(2024, 1, 3));
        assert_eq!(
            UsageForecaster::forecast(&BTreeMap::new(), &ctx),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_linear_fit_vertical_points() {
        assert_eq!(linear_fit(&[(1.0, 1.0), (1.0, 4.0)]), None);
        assert_eq!(linear_fit(&[]), None);
    }
}
