use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::uint_range::{deserialize_uint, sort_and_merge, UintRange};

/// An amount of every badge id in `badge_ids` held for every time in
/// `ownership_times`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    #[serde(deserialize_with = "deserialize_uint")]
    pub amount: u64,
    #[serde(default)]
    pub badge_ids: Vec<UintRange>,
    #[serde(default)]
    pub ownership_times: Vec<UintRange>,
}

impl Balance {
    pub fn new(amount: u64, badge_ids: Vec<UintRange>, ownership_times: Vec<UintRange>) -> Self {
        Self {
            amount,
            badge_ids,
            ownership_times,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error(
        "underflow for badge ids {badge_ids:?} at times {ownership_times:?}: have {available}, need {requested}"
    )]
    Underflow {
        badge_ids: UintRange,
        ownership_times: UintRange,
        available: u64,
        requested: u64,
    },
    #[error("overflow for badge ids {badge_ids:?} at times {ownership_times:?}")]
    Overflow {
        badge_ids: UintRange,
        ownership_times: UintRange,
    },
}

type Cell = (UintRange, UintRange);

/// Balances projected onto a common grid of elementary id and time
/// intervals, so arithmetic can be done cell by cell.
struct Grid {
    ids: Vec<UintRange>,
    times: Vec<UintRange>,
}

impl Grid {
    fn covering<'a>(sets: impl IntoIterator<Item = &'a [Balance]>) -> Self {
        let mut id_ranges = Vec::new();
        let mut time_ranges = Vec::new();
        for balances in sets {
            for balance in balances {
                id_ranges.extend(balance.badge_ids.iter().copied());
                time_ranges.extend(balance.ownership_times.iter().copied());
            }
        }
        Self {
            ids: elementary_intervals(&id_ranges),
            times: elementary_intervals(&time_ranges),
        }
    }

    fn cells(&self, balances: &[Balance]) -> Result<BTreeMap<Cell, u64>, BalanceError> {
        let mut cells: BTreeMap<Cell, u64> = BTreeMap::new();
        for balance in balances {
            if balance.amount == 0 {
                continue;
            }
            let times = covered(&self.times, &balance.ownership_times);
            for id in covered(&self.ids, &balance.badge_ids) {
                for &time in &times {
                    let slot = cells.entry((id, time)).or_default();
                    *slot = slot
                        .checked_add(balance.amount)
                        .ok_or(BalanceError::Overflow {
                            badge_ids: id,
                            ownership_times: time,
                        })?;
                }
            }
        }
        Ok(cells)
    }
}

fn elementary_intervals(ranges: &[UintRange]) -> Vec<UintRange> {
    let mut points: BTreeSet<u128> = BTreeSet::new();
    for range in ranges.iter().filter(|range| range.is_valid()) {
        points.insert(u128::from(range.start));
        points.insert(u128::from(range.end) + 1);
    }

    let union = sort_and_merge(ranges.to_vec());
    let points: Vec<u128> = points.into_iter().collect();
    points
        .windows(2)
        .filter_map(|window| {
            let candidate = UintRange::new(window[0] as u64, (window[1] - 1) as u64);
            let idx = union.partition_point(|range| range.end < candidate.start);
            union
                .get(idx)
                .is_some_and(|range| range.start <= candidate.start && candidate.end <= range.end)
                .then_some(candidate)
        })
        .collect()
}

/// Grid cells lying inside `ranges`. `grid` is sorted and disjoint.
fn covered(grid: &[UintRange], ranges: &[UintRange]) -> Vec<UintRange> {
    let mut cells = Vec::new();
    for range in sort_and_merge(ranges.to_vec()) {
        let first = grid.partition_point(|cell| cell.end < range.start);
        cells.extend(
            grid[first..]
                .iter()
                .take_while(|cell| cell.start <= range.end)
                .filter(|cell| range.start <= cell.start && cell.end <= range.end)
                .copied(),
        );
    }
    cells
}

/// Rebuilds compact balances from cells, grouping equal amounts first by time
/// and then by badge ids.
fn from_cells(cells: impl IntoIterator<Item = (Cell, u64)>) -> Vec<Balance> {
    let mut by_time: BTreeMap<(u64, UintRange), Vec<UintRange>> = BTreeMap::new();
    for ((id, time), amount) in cells {
        by_time.entry((amount, time)).or_default().push(id);
    }

    let mut by_ids: BTreeMap<(u64, Vec<UintRange>), Vec<UintRange>> = BTreeMap::new();
    for ((amount, time), ids) in by_time {
        by_ids
            .entry((amount, sort_and_merge(ids)))
            .or_default()
            .push(time);
    }

    let mut balances: Vec<Balance> = by_ids
        .into_iter()
        .map(|((amount, badge_ids), times)| Balance {
            amount,
            badge_ids,
            ownership_times: sort_and_merge(times),
        })
        .collect();
    balances.sort_by(|lhs, rhs| {
        (&lhs.badge_ids, &lhs.ownership_times, lhs.amount).cmp(&(
            &rhs.badge_ids,
            &rhs.ownership_times,
            rhs.amount,
        ))
    });
    balances
}

/// Canonical form: zero amounts dropped, ranges merged, deterministic order.
pub fn normalize_balances(balances: &[Balance]) -> Vec<Balance> {
    let grid = Grid::covering([balances]);
    match grid.cells(balances) {
        Ok(cells) => from_cells(cells),
        // Overflowing input cannot be normalized; keep it as given.
        Err(_) => balances.to_vec(),
    }
}

pub fn add_balances(current: &[Balance], to_add: &[Balance]) -> Result<Vec<Balance>, BalanceError> {
    let grid = Grid::covering([current, to_add]);
    let mut cells = grid.cells(current)?;
    for (cell, amount) in grid.cells(to_add)? {
        let slot = cells.entry(cell).or_default();
        *slot = slot.checked_add(amount).ok_or(BalanceError::Overflow {
            badge_ids: cell.0,
            ownership_times: cell.1,
        })?;
    }
    Ok(from_cells(cells.into_iter().filter(|(_, amount)| *amount > 0)))
}

/// Subtracts `to_subtract` from `current`; any cell that would go negative is
/// an error.
pub fn subtract_balances(
    current: &[Balance],
    to_subtract: &[Balance],
) -> Result<Vec<Balance>, BalanceError> {
    let grid = Grid::covering([current, to_subtract]);
    let mut cells = grid.cells(current)?;
    for (cell, requested) in grid.cells(to_subtract)? {
        let available = cells.get(&cell).copied().unwrap_or_default();
        let remaining = available
            .checked_sub(requested)
            .ok_or(BalanceError::Underflow {
                badge_ids: cell.0,
                ownership_times: cell.1,
                available,
                requested,
            })?;
        cells.insert(cell, remaining);
    }
    Ok(from_cells(cells.into_iter().filter(|(_, amount)| *amount > 0)))
}

/// Running remainder for subtracting many balance sets from one supply. The
/// grid is built once over the supply and every set that will be taken from
/// it, so each subtraction only touches its own cells.
pub struct SupplyLedger {
    grid: Grid,
    cells: BTreeMap<Cell, u64>,
}

impl SupplyLedger {
    pub fn new<'a>(
        supply: &'a [Balance],
        upcoming: impl IntoIterator<Item = &'a [Balance]>,
    ) -> Result<Self, BalanceError> {
        let grid = Grid::covering(std::iter::once(supply).chain(upcoming));
        let cells = grid.cells(supply)?;
        Ok(Self { grid, cells })
    }

    /// Takes `balances` out of the remainder. `balances` must be one of the
    /// sets the ledger was built with; regions outside its grid are not seen.
    /// Nothing is taken when any cell would go negative.
    pub fn subtract(&mut self, balances: &[Balance]) -> Result<(), BalanceError> {
        let requested = self.grid.cells(balances)?;
        for (cell, amount) in &requested {
            let available = self.cells.get(cell).copied().unwrap_or_default();
            if available < *amount {
                return Err(BalanceError::Underflow {
                    badge_ids: cell.0,
                    ownership_times: cell.1,
                    available,
                    requested: *amount,
                });
            }
        }
        for (cell, amount) in requested {
            if let Some(slot) = self.cells.get_mut(&cell) {
                *slot -= amount;
            }
        }
        Ok(())
    }

    pub fn remaining(&self) -> Vec<Balance> {
        from_cells(
            self.cells
                .iter()
                .filter(|(_, amount)| **amount > 0)
                .map(|(cell, amount)| (*cell, *amount)),
        )
    }
}

/// Multiplies every amount, used when one transfer pays several recipients.
pub fn scale_balances(balances: &[Balance], factor: u64) -> Result<Vec<Balance>, BalanceError> {
    balances
        .iter()
        .map(|balance| {
            let amount = balance
                .amount
                .checked_mul(factor)
                .ok_or_else(|| BalanceError::Overflow {
                    badge_ids: balance.badge_ids.first().copied().unwrap_or(UintRange::FULL),
                    ownership_times: balance
                        .ownership_times
                        .first()
                        .copied()
                        .unwrap_or(UintRange::FULL),
                })?;
            Ok(Balance {
                amount,
                ..balance.clone()
            })
        })
        .collect()
}

/// Equality after normalization, so zero entries and range splits are
/// ignored.
pub fn balances_equal(lhs: &[Balance], rhs: &[Balance]) -> bool {
    normalize_balances(lhs) == normalize_balances(rhs)
}

/// Zero-amount entries for every id/time region held in `previous` but not in
/// `next`, so downstream readers see the holding drop out explicitly.
pub fn dropped_out_zero_entries(previous: &[Balance], next: &[Balance]) -> Vec<Balance> {
    let grid = Grid::covering([previous, next]);
    let (Ok(before), Ok(after)) = (grid.cells(previous), grid.cells(next)) else {
        return Vec::new();
    };
    from_cells(
        before
            .into_keys()
            .filter(|cell| !after.contains_key(cell))
            .map(|cell| (cell, 0)),
    )
}

pub fn is_empty_balance(balances: &[Balance]) -> bool {
    balances
        .iter()
        .all(|balance| balance.amount == 0 || balance.badge_ids.is_empty() || balance.ownership_times.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bal(amount: u64, ids: (u64, u64)) -> Balance {
        Balance::new(amount, vec![UintRange::new(ids.0, ids.1)], vec![UintRange::FULL])
    }

    #[test]
    fn add_merges_overlapping_holdings() {
        let total = add_balances(&[bal(1, (1, 5))], &[bal(2, (3, 7))]).unwrap();
        assert_eq!(
            total,
            vec![bal(1, (1, 2)), bal(3, (3, 5)), bal(2, (6, 7))]
        );
    }

    #[test]
    fn subtract_leaves_remainder() {
        let remaining = subtract_balances(&[bal(10, (1, 10))], &[bal(3, (1, 10))]).unwrap();
        assert_eq!(remaining, vec![bal(7, (1, 10))]);

        let partial = subtract_balances(&[bal(1, (1, 10))], &[bal(1, (1, 5))]).unwrap();
        assert_eq!(partial, vec![bal(1, (6, 10))]);
    }

    #[test]
    fn subtract_reports_underflow() {
        let err = subtract_balances(&[bal(5, (1, 1))], &[bal(6, (1, 1))]).unwrap_err();
        assert!(matches!(
            err,
            BalanceError::Underflow {
                available: 5,
                requested: 6,
                ..
            }
        ));

        let uncovered = subtract_balances(&[bal(5, (1, 1))], &[bal(1, (2, 2))]).unwrap_err();
        assert!(matches!(uncovered, BalanceError::Underflow { available: 0, .. }));
    }

    #[test]
    fn equality_ignores_split_ranges() {
        let split = vec![bal(1, (1, 3)), bal(1, (4, 6)), bal(0, (9, 9))];
        assert!(balances_equal(&split, &[bal(1, (1, 6))]));
        assert!(!balances_equal(&split, &[bal(2, (1, 6))]));
    }

    #[test]
    fn dropped_out_regions_become_zero_entries() {
        let zeros = dropped_out_zero_entries(&[bal(4, (1, 10))], &[bal(4, (1, 5))]);
        assert_eq!(zeros, vec![bal(0, (6, 10))]);

        assert!(dropped_out_zero_entries(&[bal(4, (1, 10))], &[bal(1, (1, 10))]).is_empty());
    }

    #[test]
    fn supply_ledger_takes_each_claim_in_turn() {
        let supply = [bal(3, (1, 100))];
        let claims: Vec<Vec<Balance>> = (1..=100).map(|id| vec![bal(1, (id, id))]).collect();
        let mut ledger =
            SupplyLedger::new(&supply, claims.iter().map(Vec::as_slice)).unwrap();

        for claim in &claims {
            ledger.subtract(claim).unwrap();
        }
        assert_eq!(ledger.remaining(), vec![bal(2, (1, 100))]);
    }

    #[test]
    fn supply_ledger_rejects_overdraw_without_taking_anything() {
        let supply = [bal(1, (1, 2))];
        let first = vec![bal(1, (1, 1))];
        let greedy = vec![bal(1, (1, 2))];
        let mut ledger =
            SupplyLedger::new(&supply, [first.as_slice(), greedy.as_slice()]).unwrap();

        ledger.subtract(&first).unwrap();
        let err = ledger.subtract(&greedy).unwrap_err();
        assert!(matches!(
            err,
            BalanceError::Underflow {
                available: 0,
                requested: 1,
                ..
            }
        ));
        assert_eq!(ledger.remaining(), vec![bal(1, (2, 2))]);
    }

    #[test]
    fn scale_multiplies_amounts() {
        let scaled = scale_balances(&[bal(3, (1, 1))], 4).unwrap();
        assert_eq!(scaled, vec![bal(12, (1, 1))]);
        assert!(scale_balances(&[bal(u64::MAX, (1, 1))], 2).is_err());
    }
}
