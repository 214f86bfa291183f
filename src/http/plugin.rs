//! Plugin composition.
//!
//! An `App` collects routes and plugins, then builds an axum `Router` in which
//! every route is wrapped by every installed plugin, in installation order.
//!
//! # Responsibilities
//! - Install each plugin kind at most once
//! - Let plugins register their own routes during setup
//! - Exempt a plugin's own routes from that plugin
//!
//! # Design Decisions
//! - Wrapping happens in `into_router`, so routes added after a plugin is
//!   installed are still wrapped
//! - A disabled capability installs normally and leaves routes untouched

use axum::{middleware::from_fn_with_state, routing::MethodRouter, Router};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use super::exposition::exposition_route;
use super::middleware::{count_requests, time_requests, trace_request, track_in_progress, RouteState};
use crate::observability::MetricKind;
use crate::telemetry::Telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Tracing,
    Metrics,
    Platform,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Tracing => f.write_str("tracing"),
            PluginKind::Metrics => f.write_str("metrics"),
            PluginKind::Platform => f.write_str("platform"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("{0} plugin is already installed")]
    DuplicateInstallation(PluginKind),
}

/// What a plugin knows about the route it wraps.
pub struct RouteContext<'a> {
    pub path: &'a str,
    /// Plugin that registered the route, if any.
    pub owner: Option<PluginKind>,
    pub telemetry: &'a Telemetry,
}

pub trait Plugin: Send + Sync + 'static {
    fn kind(&self) -> PluginKind;

    /// Called once on installation.
    fn setup(&mut self, _app: &mut App) -> Result<(), PluginError> {
        Ok(())
    }

    /// Wrap one route.
    fn apply(&self, route: MethodRouter, ctx: &RouteContext<'_>) -> MethodRouter;
}

struct RouteEntry {
    path: String,
    handler: MethodRouter,
    owner: Option<PluginKind>,
}

/// Application builder.
pub struct App {
    telemetry: Telemetry,
    routes: Vec<RouteEntry>,
    plugins: Vec<Box<dyn Plugin>>,
    installed: HashSet<PluginKind>,
}

impl App {
    pub fn new(telemetry: Telemetry) -> Self {
        Self {
            telemetry,
            routes: Vec::new(),
            plugins: Vec::new(),
            installed: HashSet::new(),
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Register an application route.
    pub fn route(&mut self, path: &str, handler: MethodRouter) -> &mut Self {
        self.push_route(path, handler, None);
        self
    }

    /// Register a route owned by the plugin `owner`.
    pub fn plugin_route(&mut self, owner: PluginKind, path: &str, handler: MethodRouter) -> &mut Self {
        self.push_route(path, handler, Some(owner));
        self
    }

    fn push_route(&mut self, path: &str, handler: MethodRouter, owner: Option<PluginKind>) {
        tracing::debug!(path = %path, owner = ?owner, "Route registered");
        self.routes.push(RouteEntry {
            path: path.to_string(),
            handler,
            owner,
        });
    }

    /// Install `plugin`.
    ///
    /// Fails if a plugin of the same kind is already installed; the existing
    /// installation stays in place. A failed setup undoes everything it did,
    /// including plugins and routes it installed on the way.
    pub fn install<P: Plugin>(&mut self, mut plugin: P) -> Result<(), PluginError> {
        let kind = plugin.kind();
        if self.installed.contains(&kind) {
            tracing::error!(plugin = %kind, "Duplicate plugin installation");
            return Err(PluginError::DuplicateInstallation(kind));
        }

        let installed_before = self.installed.clone();
        let (plugins_before, routes_before) = (self.plugins.len(), self.routes.len());
        self.installed.insert(kind);

        if let Err(e) = plugin.setup(self) {
            tracing::warn!(plugin = %kind, error = %e, "Plugin setup failed, rolling back");
            self.installed = installed_before;
            self.plugins.truncate(plugins_before);
            self.routes.truncate(routes_before);
            return Err(e);
        }

        tracing::info!(plugin = %kind, "Plugin installed");
        self.plugins.push(Box::new(plugin));
        Ok(())
    }

    pub fn is_installed(&self, kind: PluginKind) -> bool {
        self.installed.contains(&kind)
    }

    /// Build the router, wrapping every route with every installed plugin.
    pub fn into_router(self) -> Router {
        let mut router = Router::new();
        for entry in self.routes {
            let ctx = RouteContext {
                path: &entry.path,
                owner: entry.owner,
                telemetry: &self.telemetry,
            };

            let mut handler = entry.handler;
            for plugin in &self.plugins {
                if entry.owner == Some(plugin.kind()) {
                    continue;
                }
                handler = plugin.apply(handler, &ctx);
            }
            router = router.route(&entry.path, handler);
        }
        router
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes: Vec<&str> = self.routes.iter().map(|r| r.path.as_str()).collect();
        let plugins: Vec<PluginKind> = self.plugins.iter().map(|p| p.kind()).collect();
        f.debug_struct("App")
            .field("routes", &routes)
            .field("plugins", &plugins)
            .finish()
    }
}

/// Runs every route inside a server span.
#[derive(Debug, Default)]
pub struct TracingPlugin;

impl Plugin for TracingPlugin {
    fn kind(&self) -> PluginKind {
        PluginKind::Tracing
    }

    fn apply(&self, route: MethodRouter, ctx: &RouteContext<'_>) -> MethodRouter {
        if !ctx.telemetry.config().tracing.enabled {
            return route;
        }
        let state = RouteState::new(ctx.telemetry.clone(), ctx.path);
        route.layer(from_fn_with_state(state, trace_request))
    }
}

/// Applies the configured metric policies and serves the exposition route.
#[derive(Debug, Default)]
pub struct MetricsPlugin {
    kinds: Vec<MetricKind>,
}

impl MetricsPlugin {
    pub fn kinds(&self) -> &[MetricKind] {
        &self.kinds
    }
}

impl Plugin for MetricsPlugin {
    fn kind(&self) -> PluginKind {
        PluginKind::Metrics
    }

    fn setup(&mut self, app: &mut App) -> Result<(), PluginError> {
        let config = &app.telemetry().config().metrics;
        if !config.enabled {
            return Ok(());
        }
        self.kinds = MetricKind::resolve(&config.metrics);

        let path = config.path.clone();
        let route = exposition_route(app.telemetry().clone());
        app.plugin_route(PluginKind::Metrics, &path, route);
        Ok(())
    }

    fn apply(&self, route: MethodRouter, ctx: &RouteContext<'_>) -> MethodRouter {
        // Earlier kinds sit closer to the handler.
        self.kinds.iter().fold(route, |route, kind| {
            let state = RouteState::new(ctx.telemetry.clone(), ctx.path);
            match kind {
                MetricKind::Latency => route.layer(from_fn_with_state(state, time_requests)),
                MetricKind::RequestCount => route.layer(from_fn_with_state(state, count_requests)),
                MetricKind::ProcessingRequests => {
                    route.layer(from_fn_with_state(state, track_in_progress))
                }
            }
        })
    }
}

/// Installs tracing and metrics according to their enable flags.
#[derive(Debug, Default)]
pub struct PlatformPlugin;

impl Plugin for PlatformPlugin {
    fn kind(&self) -> PluginKind {
        PluginKind::Platform
    }

    fn setup(&mut self, app: &mut App) -> Result<(), PluginError> {
        let config = app.telemetry().config();
        let (tracing_enabled, metrics_enabled) = (config.tracing.enabled, config.metrics.enabled);

        if tracing_enabled {
            app.install(TracingPlugin)?;
        }
        if metrics_enabled {
            app.install(MetricsPlugin::default())?;
        }
        Ok(())
    }

    fn apply(&self, route: MethodRouter, _ctx: &RouteContext<'_>) -> MethodRouter {
        route
    }
}
