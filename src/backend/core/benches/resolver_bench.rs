//! Benchmarks for permission resolution.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use warden_core::bootstrap;
use warden_core::config::Config;
use warden_core::rbac::resolver::evaluate;
use warden_core::rbac::{builtin_catalog, CatalogSnapshot, CheckRequest, MemberGrant, PermissionResolver, PermissionSlug, ResourceMember, ResourceRef, RoleSlug, UserId};

fn resolver(rt: &tokio::runtime::Runtime, config: &Config) -> PermissionResolver {
    rt.block_on(async {
        let (resolver, _) = bootstrap::in_memory_resolver(config, builtin_catalog()).await.unwrap();
        let manager = resolver.membership_manager();
        manager.assign_role(&UserId::from("bench-user"), &RoleSlug::from("editor")).await.unwrap();
        let grant = MemberGrant { role: None, permissions: vec!["legal_instruments.manage".into()] };
        manager.upsert_member(UserId::from("bench-user"), ResourceRef::project("proj-1").unwrap(), grant, None).await.unwrap();
        resolver
    })
}

fn bench_catalog_build(c: &mut Criterion) {
    c.bench_function("catalog_build_builtin", |b| { b.iter(|| black_box(CatalogSnapshot::build(builtin_catalog()).unwrap())); });
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let catalog = CatalogSnapshot::build(builtin_catalog()).unwrap();
    let roles = [RoleSlug::from("viewer"), RoleSlug::from("editor")];
    let member = ResourceMember::new("u".into(), ResourceRef::project("p").unwrap()).with_role("manager").with_permission("files.upload");
    let global = PermissionSlug::from("projects.edit");
    let scoped = PermissionSlug::from("projects.delete");
    group.bench_function("global_hit", |b| { b.iter(|| black_box(evaluate(&catalog, &global, Some(&roles[..]), None))); });
    group.bench_function("member_role_hit", |b| { b.iter(|| black_box(evaluate(&catalog, &scoped, Some(&roles[..]), Some(&member)))); });
    group.bench_function("unknown_user", |b| { b.iter(|| black_box(evaluate(&catalog, &global, None, None))); });
    group.finish();
}

fn bench_can(c: &mut Criterion) {
    let mut group = c.benchmark_group("can");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let user = UserId::from("bench-user");
    let global = CheckRequest::global("projects.edit");
    let scoped = CheckRequest::scoped("legal_instruments.manage", ResourceRef::project("proj-1").unwrap());

    let (user, global, scoped) = (&user, &global, &scoped);

    let cached = &resolver(&rt, &Config::default());
    group.bench_function("global_cached", |b| { b.to_async(&rt).iter(|| async move { black_box(cached.can(user, global).await.unwrap()) }); });
    group.bench_function("scoped_cached", |b| { b.to_async(&rt).iter(|| async move { black_box(cached.can(user, scoped).await.unwrap()) }); });

    let mut uncached_config = Config::default();
    uncached_config.cache.role_ttl = Duration::ZERO;
    uncached_config.cache.membership_ttl = Duration::ZERO;
    let uncached = &resolver(&rt, &uncached_config);
    group.bench_function("scoped_uncached", |b| { b.to_async(&rt).iter(|| async move { black_box(uncached.can(user, scoped).await.unwrap()) }); });
    group.finish();
}

fn bench_can_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("can_many");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let resolver = &resolver(&rt, &Config::default());
    let user = &UserId::from("bench-user");
    let all: Vec<String> = builtin_catalog().permissions.iter().map(|p| p.slug.to_string()).collect();
    for n in [1usize, 4, all.len()] {
        let slugs = &all[..n];
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &slugs, |b, &slugs| { b.to_async(&rt).iter(|| async move { black_box(resolver.can_many(user, slugs).await.unwrap()) }); });
    }
    group.finish();
}

criterion_group!(benches, bench_catalog_build, bench_evaluate, bench_can, bench_can_many);
criterion_main!(benches);
