use std::collections::{BTreeMap, BTreeSet};

use tokio::time::{Duration, Instant};

use crate::{WorkerId, error::ContributionErr};

/// The lifecycle of a `Round`, it only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    Open,
    Closing,
    Closed,
}

/// One synchronized cycle of contribution collection, aggregation and broadcast.
///
/// A worker is *settled* for a round once it contributed, sent something that
/// had to be discarded, or disconnected. A round is complete when every
/// expected worker is settled.
#[derive(Debug)]
pub struct Round {
    id: u64,
    dimension: usize,
    expected: BTreeSet<WorkerId>,
    contributions: BTreeMap<WorkerId, Vec<f32>>,
    discarded: BTreeSet<WorkerId>,
    departed: BTreeSet<WorkerId>,
    opened_at: Instant,
    deadline: Option<Instant>,
    extended: bool,
    status: RoundStatus,
}

impl Round {
    /// Opens a new `Round`.
    ///
    /// # Arguments
    /// * `id` - The round's sequence number.
    /// * `expected` - The workers invited to contribute.
    /// * `dimension` - The length every contribution must have.
    /// * `opened_at` - When the round started.
    /// * `deadline` - When the round may close with missing contributions, `None` to wait forever.
    pub fn open(
        id: u64,
        expected: BTreeSet<WorkerId>,
        dimension: usize,
        opened_at: Instant,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            id,
            dimension,
            expected,
            contributions: BTreeMap::new(),
            discarded: BTreeSet::new(),
            departed: BTreeSet::new(),
            opened_at,
            deadline,
            extended: false,
            status: RoundStatus::Open,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> RoundStatus {
        self.status
    }

    pub fn expected(&self) -> &BTreeSet<WorkerId> {
        &self.expected
    }

    pub fn contributions(&self) -> &BTreeMap<WorkerId, Vec<f32>> {
        &self.contributions
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether `worker` was invited to this round.
    pub fn is_invited(&self, worker: WorkerId) -> bool {
        self.expected.contains(&worker)
    }

    /// Whether `worker` already contributed or had its frame discarded in this round.
    pub fn has_responded(&self, worker: WorkerId) -> bool {
        self.contributions.contains_key(&worker) || self.discarded.contains(&worker)
    }

    /// Whether no contribution has been deposited.
    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Whether every expected worker is settled.
    pub fn is_complete(&self) -> bool {
        self.expected.iter().all(|worker| {
            self.has_responded(*worker) || self.departed.contains(worker)
        })
    }

    /// Checks that `worker` may still respond to this round.
    fn admit(&self, worker: WorkerId) -> Result<(), ContributionErr> {
        let round = self.id;

        if self.status != RoundStatus::Open {
            return Err(ContributionErr::RoundNotOpen { round });
        }

        if !self.is_invited(worker) {
            return Err(ContributionErr::NotInvited { round });
        }

        if self.has_responded(worker) {
            return Err(ContributionErr::Duplicate { round });
        }

        Ok(())
    }

    /// Deposits `worker`'s contribution into this round.
    ///
    /// A contribution with the wrong length is discarded, but still counts as the
    /// worker's response to this round.
    ///
    /// # Arguments
    /// * `worker` - The contributing worker.
    /// * `vector` - The worker's gradient.
    ///
    /// # Returns
    /// A `ContributionErr` if the contribution wasn't accepted.
    pub fn deposit(&mut self, worker: WorkerId, vector: Vec<f32>) -> Result<(), ContributionErr> {
        self.admit(worker)?;

        if vector.len() != self.dimension {
            self.discarded.insert(worker);
            return Err(ContributionErr::DimensionMismatch {
                got: vector.len(),
                expected: self.dimension,
            });
        }

        self.contributions.insert(worker, vector);
        Ok(())
    }

    /// Records that `worker` responded with something that had to be discarded.
    ///
    /// # Returns
    /// A `ContributionErr` if the worker may not respond to this round anymore.
    pub fn discard(&mut self, worker: WorkerId) -> Result<(), ContributionErr> {
        self.admit(worker)?;
        self.discarded.insert(worker);
        Ok(())
    }

    /// Records that `worker` disconnected.
    ///
    /// The worker stays in `expected` and whatever it already contributed still counts.
    pub fn depart(&mut self, worker: WorkerId) {
        if self.is_invited(worker) {
            self.departed.insert(worker);
        }
    }

    /// Pushes the deadline back by `grace`, at most once per round.
    ///
    /// # Returns
    /// Whether the deadline was extended.
    pub fn extend_deadline(&mut self, now: Instant, grace: Duration) -> bool {
        if self.extended || self.deadline.is_none() {
            return false;
        }

        self.extended = true;
        self.deadline = Some(now + grace);
        true
    }

    /// Moves the round from `Open` to `Closing`, rejecting any later contribution.
    ///
    /// # Returns
    /// `false` if the round had already left the `Open` state.
    pub fn begin_closing(&mut self) -> bool {
        if self.status != RoundStatus::Open {
            return false;
        }

        self.status = RoundStatus::Closing;
        true
    }

    /// Moves the round from `Closing` to `Closed`.
    ///
    /// # Returns
    /// `false` if the round wasn't `Closing`.
    pub fn finish(&mut self) -> bool {
        if self.status != RoundStatus::Closing {
            return false;
        }

        self.status = RoundStatus::Closed;
        self.contributions.clear();
        true
    }

    /// The workers that responded to this round and are owed the resulting model.
    pub fn responders(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.expected
            .iter()
            .copied()
            .filter(|worker| self.has_responded(*worker) && !self.departed.contains(worker))
    }

    /// The still connected workers that didn't respond to this round.
    pub fn missed(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.expected
            .iter()
            .copied()
            .filter(|worker| !self.has_responded(*worker) && !self.departed.contains(worker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(expected: &[WorkerId], deadline: Option<Duration>) -> Round {
        let now = Instant::now();
        let expected = expected.iter().copied().collect();
        Round::open(1, expected, 3, now, deadline.map(|d| now + d))
    }

    #[test]
    fn completes_once_every_expected_worker_contributed() {
        let mut round = round(&[1, 2], None);

        round.deposit(1, vec![1.; 3]).unwrap();
        assert!(!round.is_complete());

        round.deposit(2, vec![2.; 3]).unwrap();
        assert!(round.is_complete());
        assert_eq!(round.responders().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn rejects_uninvited_and_duplicate_contributions() {
        let mut round = round(&[1], None);

        assert_eq!(
            round.deposit(7, vec![0.; 3]),
            Err(ContributionErr::NotInvited { round: 1 })
        );

        round.deposit(1, vec![0.; 3]).unwrap();
        assert_eq!(
            round.deposit(1, vec![0.; 3]),
            Err(ContributionErr::Duplicate { round: 1 })
        );
    }

    #[test]
    fn dimension_mismatch_settles_the_worker_without_contributing() {
        let mut round = round(&[1], None);

        let res = round.deposit(1, vec![0.; 4]);
        assert_eq!(
            res,
            Err(ContributionErr::DimensionMismatch {
                got: 4,
                expected: 3
            })
        );
        assert!(round.is_empty());
        assert!(round.is_complete());
        assert_eq!(round.responders().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn no_contribution_after_closing() {
        let mut round = round(&[1, 2], None);
        round.deposit(1, vec![0.; 3]).unwrap();

        assert!(round.begin_closing());
        assert!(!round.begin_closing());
        assert_eq!(
            round.deposit(2, vec![0.; 3]),
            Err(ContributionErr::RoundNotOpen { round: 1 })
        );

        assert!(round.finish());
        assert_eq!(round.status(), RoundStatus::Closed);
        assert!(!round.finish());
    }

    #[test]
    fn departed_worker_stays_expected_but_settled() {
        let mut round = round(&[1, 2, 3], None);
        round.deposit(1, vec![1.; 3]).unwrap();
        round.deposit(3, vec![3.; 3]).unwrap();
        round.depart(3);
        round.depart(2);

        assert!(round.is_complete());
        assert!(round.expected().contains(&2));
        assert_eq!(round.contributions().len(), 2);
        assert_eq!(round.responders().collect::<Vec<_>>(), vec![1]);
        assert_eq!(round.missed().count(), 0);
    }

    #[test]
    fn deadline_extends_only_once() {
        let mut round = round(&[1], Some(Duration::from_millis(10)));
        let now = Instant::now();

        assert!(round.extend_deadline(now, Duration::from_millis(5)));
        assert_eq!(round.deadline(), Some(now + Duration::from_millis(5)));
        assert!(!round.extend_deadline(now, Duration::from_millis(5)));

        let mut barrier = self::round(&[1], None);
        assert!(!barrier.extend_deadline(now, Duration::from_millis(5)));
    }
}
