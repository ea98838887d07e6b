use chrono::{DateTime, Duration, Utc};

use crate::predict::{Ephemeris, PassWindow, PredictError};

const COARSE_STEP_SECONDS: i64 = 60; // 1 minute for initial scan
const FINE_STEP_SECONDS: i64 = 1; // 1 second for refinement
const HORIZON_ELEVATION: f64 = 0.0;
const SEARCH_WINDOW: Duration = Duration::days(3);

/// Finds the pass in progress at `from`, or the next one to rise.
pub fn find_next_pass<E: Ephemeris + ?Sized>(
    ephemeris: &E,
    from: DateTime<Utc>,
    orbital_period_s: f64,
) -> Result<Option<PassWindow>, PredictError> {
    let coarse_step = Duration::seconds(COARSE_STEP_SECONDS);
    let elevation = |t: DateTime<Utc>| ephemeris.look_at(t).map(|l| l.elevation_deg);

    let mut rise = if elevation(from)? >= HORIZON_ELEVATION {
        // Already above the horizon: walk back to where this pass rose.
        let limit = from - Duration::seconds((orbital_period_s / 2.0).max(600.0) as i64);
        let mut cursor = from;
        while cursor > limit && elevation(cursor - coarse_step)? >= HORIZON_ELEVATION {
            cursor -= coarse_step;
        }
        Some(refine_crossing(ephemeris, cursor - coarse_step, cursor, true)?)
    } else {
        None
    };

    let end = from + SEARCH_WINDOW;
    let mut cursor = from;
    while rise.is_none() && cursor <= end {
        let next = cursor + coarse_step;
        if elevation(next)? >= HORIZON_ELEVATION {
            rise = Some(refine_crossing(ephemeris, cursor, next, true)?);
        }
        cursor = next;
    }
    let Some(rise) = rise else {
        return Ok(None);
    };

    let mut max_el = elevation(rise)?;
    let mut max_el_time = rise;
    let mut cursor = rise;
    loop {
        let next = cursor + coarse_step;
        let el = elevation(next)?;
        if el < HORIZON_ELEVATION {
            let los = refine_crossing(ephemeris, cursor, next, false)?;
            let (tca, tca_el) = refine_maximum(ephemeris, max_el_time, coarse_step)?;
            return Ok(Some(PassWindow {
                rise,
                tca,
                los,
                max_elevation_deg: tca_el.max(max_el),
            }));
        }
        if el > max_el {
            max_el = el;
            max_el_time = next;
        }
        cursor = next;
        if cursor > end {
            return Ok(None);
        }
    }
}

/// Binary search to find exact horizon crossing time
fn refine_crossing<E: Ephemeris + ?Sized>(
    ephemeris: &E,
    before: DateTime<Utc>,
    after: DateTime<Utc>,
    is_aos: bool, // true = rising, false = setting
) -> Result<DateTime<Utc>, PredictError> {
    let mut low = before;
    let mut high = after;

    while (high - low).num_seconds() > FINE_STEP_SECONDS {
        let mid = low + (high - low) / 2;
        let above = ephemeris.look_at(mid)?.elevation_deg >= HORIZON_ELEVATION;
        if above == is_aos {
            high = mid;
        } else {
            low = mid;
        }
    }

    Ok(if is_aos { high } else { low })
}

/// Ternary search for the elevation peak around a coarse maximum.
fn refine_maximum<E: Ephemeris + ?Sized>(
    ephemeris: &E,
    around: DateTime<Utc>,
    span: Duration,
) -> Result<(DateTime<Utc>, f64), PredictError> {
    let mut low = around - span;
    let mut high = around + span;
    while (high - low).num_seconds() > FINE_STEP_SECONDS * 2 {
        let third = (high - low) / 3;
        let a = low + third;
        let b = high - third;
        if ephemeris.look_at(a)?.elevation_deg < ephemeris.look_at(b)?.elevation_deg {
            low = a;
        } else {
            high = b;
        }
    }
    let tca = low + (high - low) / 2;
    Ok((tca, ephemeris.look_at(tca)?.elevation_deg))
}
