use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{extract::LightColor, Result, SpotihueError};

/// Brightness used for the neutral baseline, the bridge's maximum.
pub const NEUTRAL_BRIGHTNESS: u8 = 254;
/// Warm white hue on the bridge's 16-bit hue wheel.
pub const NEUTRAL_HUE: u16 = 10_000;
pub const NEUTRAL_SATURATION: u8 = 120;

/// A light as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub name: String,
    pub reachable: bool,
    /// `false` for white-only bulbs that have no chromaticity control.
    pub supports_color: bool,
}

impl Fixture {
    pub fn color(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reachable: true,
            supports_color: true,
        }
    }

    pub fn white(name: impl Into<String>) -> Self {
        Self {
            supports_color: false,
            ..Self::color(name)
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }
}

/// State change for a single fixture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LightCommand {
    /// Switch on at a comfortable white. `hue`/`saturation` are only set for
    /// color fixtures.
    Neutral {
        brightness: u8,
        hue: Option<u16>,
        saturation: Option<u8>,
    },
    Color(LightColor),
}

impl LightCommand {
    pub fn neutral_for(fixture: &Fixture) -> Self {
        let (hue, saturation) = if fixture.supports_color {
            (Some(NEUTRAL_HUE), Some(NEUTRAL_SATURATION))
        } else {
            (None, None)
        };
        Self::Neutral {
            brightness: NEUTRAL_BRIGHTNESS,
            hue,
            saturation,
        }
    }
}

/// Keeps the requested names that the bridge currently reports as
/// reachable, in request order and without duplicates.
pub fn resolve_fixtures(requested: &[String], available: &[Fixture]) -> Vec<Fixture> {
    let mut resolved: Vec<Fixture> = Vec::new();
    for name in requested {
        if resolved.iter().any(|fixture| &fixture.name == name) {
            continue;
        }
        match available.iter().find(|fixture| &fixture.name == name) {
            Some(fixture) if fixture.reachable => resolved.push(fixture.clone()),
            Some(_) => tracing::debug!(fixture = %name, "skipping unreachable fixture"),
            None => tracing::debug!(fixture = %name, "skipping unknown fixture"),
        }
    }
    resolved
}

/// Pairs fixture `i` with `colors[i % colors.len()]`. White-only fixtures
/// keep their slot in the rotation but receive no command.
pub fn plan_colors(fixtures: &[Fixture], colors: &[LightColor]) -> Vec<(Fixture, LightCommand)> {
    if colors.is_empty() {
        return Vec::new();
    }

    fixtures
        .iter()
        .enumerate()
        .filter(|(_, fixture)| fixture.supports_color)
        .map(|(index, fixture)| {
            (
                fixture.clone(),
                LightCommand::Color(colors[index % colors.len()]),
            )
        })
        .collect()
}

pub fn plan_neutral(fixtures: &[Fixture]) -> Vec<(Fixture, LightCommand)> {
    fixtures
        .iter()
        .map(|fixture| (fixture.clone(), LightCommand::neutral_for(fixture)))
        .collect()
}

/// Access to the light bridge.
///
/// Implementors provide connection, discovery and single-fixture commands;
/// the neutral and color operations are built on top of them and resolve
/// fixture names against what the bridge reports at call time.
#[async_trait]
pub trait LightController: Send + Sync {
    /// Establishes (or re-validates) the bridge connection.
    async fn connect(&self) -> Result<()>;

    async fn list_fixtures(&self) -> Result<Vec<Fixture>>;

    async fn apply(&self, fixture: &Fixture, command: LightCommand) -> Result<()>;

    /// Sets every named fixture to the neutral baseline.
    async fn set_neutral(&self, fixtures: &[String]) -> Result<()> {
        let available = self.list_fixtures().await?;
        let resolved = resolve_fixtures(fixtures, &available);
        apply_plan(self, plan_neutral(&resolved)).await
    }

    /// Assigns `colors` to the named fixtures cyclically.
    async fn set_colors(&self, fixtures: &[String], colors: &[LightColor]) -> Result<()> {
        let available = self.list_fixtures().await?;
        let resolved = resolve_fixtures(fixtures, &available);
        apply_plan(self, plan_colors(&resolved, colors)).await
    }
}

/// Applies every command, continuing past per-fixture failures. The last
/// failure is reported; a lost bridge aborts immediately.
async fn apply_plan<C>(controller: &C, plan: Vec<(Fixture, LightCommand)>) -> Result<()>
where
    C: LightController + ?Sized,
{
    let mut failure: Option<SpotihueError> = None;
    for (fixture, command) in plan {
        if let Err(err) = controller.apply(&fixture, command).await {
            if err.is_terminal() {
                return Err(err);
            }
            tracing::warn!(fixture = %fixture.name, error = %err, "fixture command failed");
            failure = Some(err);
        }
    }
    failure.map_or(Ok(()), Err)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// In-memory bridge that records every command it receives. Only the
    /// required trait methods are implemented, so neutral and color requests
    /// go through the shipped default methods.
    #[derive(Default)]
    pub(crate) struct RecordingBridge {
        pub fixtures: Mutex<Vec<Fixture>>,
        /// Every `apply` call, including the ones that failed.
        pub attempts: Mutex<Vec<(String, LightCommand)>>,
        /// Commands the bridge accepted.
        pub applied: Mutex<Vec<(String, LightCommand)>>,
        /// Errors returned by upcoming `apply` calls, oldest first.
        pub failures: Mutex<Vec<SpotihueError>>,
        pub connect_failures: Mutex<u32>,
    }

    impl RecordingBridge {
        pub(crate) fn with_fixtures(fixtures: Vec<Fixture>) -> Self {
            Self {
                fixtures: Mutex::new(fixtures),
                ..Self::default()
            }
        }

        /// Color commands attempted, as `(fixture, color)` pairs.
        pub(crate) fn color_attempts(&self) -> Vec<(String, LightColor)> {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(name, command)| match command {
                    LightCommand::Color(color) => Some((name.clone(), *color)),
                    LightCommand::Neutral { .. } => None,
                })
                .collect()
        }

        pub(crate) fn neutral_attempts(&self) -> usize {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, command)| matches!(command, LightCommand::Neutral { .. }))
                .count()
        }

        pub(crate) fn fail_next(&self, err: SpotihueError) {
            self.failures.lock().unwrap().push(err);
        }
    }

    #[async_trait]
    impl LightController for RecordingBridge {
        async fn connect(&self) -> Result<()> {
            let mut remaining = self.connect_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SpotihueError::FixtureControl("link button not pressed".into()));
            }
            Ok(())
        }

        async fn list_fixtures(&self) -> Result<Vec<Fixture>> {
            Ok(self.fixtures.lock().unwrap().clone())
        }

        async fn apply(&self, fixture: &Fixture, command: LightCommand) -> Result<()> {
            self.attempts
                .lock()
                .unwrap()
                .push((fixture.name.clone(), command));
            {
                let mut failures = self.failures.lock().unwrap();
                if !failures.is_empty() {
                    return Err(failures.remove(0));
                }
            }
            self.applied
                .lock()
                .unwrap()
                .push((fixture.name.clone(), command));
            Ok(())
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn palette() -> Vec<LightColor> {
        vec![LightColor::new(0.1, 0.2), LightColor::new(0.3, 0.4)]
    }

    #[test]
    fn colors_rotate_over_fixtures() {
        let fixtures: Vec<Fixture> = ["a", "b", "c", "d", "e"].map(Fixture::color).to_vec();
        let colors = palette();

        let plan = plan_colors(&fixtures, &colors);
        assert_eq!(plan.len(), 5);
        for (index, (fixture, command)) in plan.iter().enumerate() {
            assert_eq!(fixture.name, fixtures[index].name);
            assert_eq!(*command, LightCommand::Color(colors[index % colors.len()]));
        }
    }

    #[test]
    fn white_fixtures_keep_their_slot_but_get_no_color() {
        let fixtures = vec![Fixture::color("a"), Fixture::white("b"), Fixture::color("c")];
        let colors = palette();

        let plan = plan_colors(&fixtures, &colors);
        assert_eq!(
            plan,
            vec![
                (fixtures[0].clone(), LightCommand::Color(colors[0])),
                (fixtures[2].clone(), LightCommand::Color(colors[0])),
            ]
        );
        assert!(plan_colors(&fixtures, &[]).is_empty());
    }

    #[test]
    fn neutral_for_white_fixture_only_sets_brightness() {
        assert_eq!(
            LightCommand::neutral_for(&Fixture::white("w")),
            LightCommand::Neutral {
                brightness: NEUTRAL_BRIGHTNESS,
                hue: None,
                saturation: None,
            }
        );
        assert_eq!(
            LightCommand::neutral_for(&Fixture::color("c")),
            LightCommand::Neutral {
                brightness: NEUTRAL_BRIGHTNESS,
                hue: Some(NEUTRAL_HUE),
                saturation: Some(NEUTRAL_SATURATION),
            }
        );
    }

    #[test]
    fn resolution_drops_unknown_and_unreachable_names() {
        let available = vec![
            Fixture::color("Desk"),
            Fixture::color("Hall").unreachable(),
            Fixture::white("Lamp"),
        ];
        let resolved = resolve_fixtures(&names(&["Lamp", "Hall", "Attic", "Desk", "Lamp"]), &available);
        let resolved: Vec<&str> = resolved.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(resolved, vec!["Lamp", "Desk"]);
    }

    #[tokio::test]
    async fn set_colors_continues_past_a_failing_fixture() {
        let bridge = RecordingBridge::with_fixtures(vec![Fixture::color("a"), Fixture::color("b")]);
        bridge.fail_next(SpotihueError::FixtureControl("busy".into()));

        let err = bridge
            .set_colors(&names(&["a", "b"]), &palette())
            .await
            .unwrap_err();
        assert!(matches!(err, SpotihueError::FixtureControl(_)));

        let applied = bridge.applied.lock().unwrap().clone();
        assert_eq!(applied, vec![("b".to_string(), LightCommand::Color(palette()[1]))]);
    }

    #[tokio::test]
    async fn default_methods_resolve_names_at_call_time() {
        let bridge = RecordingBridge::with_fixtures(vec![
            Fixture::color("a"),
            Fixture::white("w"),
            Fixture::color("gone").unreachable(),
        ]);

        bridge.set_neutral(&names(&["w", "gone", "a"])).await.unwrap();
        assert_eq!(bridge.neutral_attempts(), 2);

        bridge.fixtures.lock().unwrap().push(Fixture::color("new"));
        bridge
            .set_colors(&names(&["a", "w", "new"]), &palette())
            .await
            .unwrap();
        assert_eq!(
            bridge.color_attempts(),
            vec![
                ("a".to_string(), palette()[0]),
                ("new".to_string(), palette()[0]),
            ]
        );
    }

    #[tokio::test]
    async fn lost_bridge_aborts_the_plan() {
        let bridge = RecordingBridge::with_fixtures(vec![Fixture::color("a"), Fixture::color("b")]);
        bridge.fail_next(SpotihueError::BridgeLost("gone".into()));

        let err = bridge.set_neutral(&names(&["a", "b"])).await.unwrap_err();
        assert!(err.is_terminal());
        assert!(bridge.applied.lock().unwrap().is_empty());
    }
}
