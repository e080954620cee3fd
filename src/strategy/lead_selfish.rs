//! Selfish mining generalized over publish/abandon thresholds.

use log::error;

use crate::{block::BlockId, chain::ChainRegistry};

use super::{lead, Decision, Strategy};

/// Selfish mining with tunable thresholds instead of the classic
/// block-by-block race.
///
/// The private chain is published once its lead over the public tip
/// reaches `publish_lead`, and abandoned once it lags by `abandon_lag` or
/// more, restarting `mine_behind` blocks behind the public tip. With
/// `selective_lead` set, publishing reveals the private chain only down to
/// that remaining lead, holding the newest blocks back for the next race.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct LeadSelfish {
    /// Blocks behind the public tip to restart from after abandoning.
    pub mine_behind: u64,
    /// Lag at which the private chain is abandoned.
    pub abandon_lag: u64,
    /// Lead at which the private chain is published.
    pub publish_lead: u64,
    /// When set, keep this much lead private on publication instead of
    /// revealing everything. Must stay below `publish_lead` to matter.
    pub selective_lead: Option<u64>,
}

impl LeadSelfish {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for LeadSelfish {
    fn default() -> Self {
        LeadSelfish {
            mine_behind: 3,
            abandon_lag: 4,
            publish_lead: 5,
            selective_lead: Some(1),
        }
    }
}

impl Strategy for LeadSelfish {
    fn name(&self) -> String {
        format!(
            "LeadSelfish(publish {}, abandon {})",
            self.publish_lead, self.abandon_lag
        )
    }

    fn on_new_tip(
        &self,
        chain: &ChainRegistry,
        public_tip: BlockId,
        mining_tip: BlockId,
    ) -> Decision {
        let lead = lead(chain, mining_tip, public_tip);

        if lead >= self.publish_lead as i64 {
            // the mined hook publishes at this lead, so a tip change
            // should never find us still holding it
            error!(
                "lead selfish: tip changed while holding a lead of {} \
                 (publish threshold {})",
                lead, self.publish_lead
            );
        }

        if lead <= -(self.abandon_lag as i64) {
            Decision::mine_on(chain.nth_parent(public_tip, self.mine_behind))
        } else {
            Decision::mine_on(mining_tip)
        }
    }

    fn on_block_mined(
        &self,
        chain: &ChainRegistry,
        public_tip: BlockId,
        _mining_tip: BlockId,
        mined: BlockId,
    ) -> Decision {
        let lead = lead(chain, mined, public_tip);

        if lead <= -(self.abandon_lag as i64) {
            // the tip hook abandons at this lag, so a mined block should
            // never land on a chain this far behind
            error!(
                "lead selfish: mined at a lag of {} (abandon threshold {})",
                -lead, self.abandon_lag
            );
        }

        if lead >= self.publish_lead as i64 {
            let revealed = match self.selective_lead {
                Some(keep) => chain
                    .ancestor_at_height(
                        mined,
                        chain[public_tip].block.height + keep,
                    )
                    .unwrap_or(mined),
                None => mined,
            };
            // the published portion is public now, own node included
            Decision {
                mining_tip: mined,
                broadcast: Some(revealed),
                public_tip: Some(revealed),
            }
        } else {
            Decision::mine_on(mined)
        }
    }
}
