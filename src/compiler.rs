//! コンパイラのメイン処理モジュール
//!
//! このモジュールは、構文木からネイティブコードの実行までのパイプライン全体
//! （IR構築 → 型検査 → コード生成 → メモリロード → 呼び出し）と、
//! ホットリロードを管理します。

use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::analyzer::{CheckedModule, TypeChecker};
use crate::codegen::{CodeGenerator, CompiledUnit};
use crate::error::{DiagnosticError, JitError, JitResult};
use crate::ir::{Module, ModuleBuilder, ModuleResolver, NoModules};
use crate::runtime::{ExecutableImage, Value};

/// デフォルトのエントリーマーカー
pub const DEFAULT_ENTRY_ATTRIBUTE: &str = "entry";
/// デフォルトのモジュール入れ子の上限
pub const DEFAULT_MAX_MODULE_DEPTH: usize = 16;

/// コンパイル設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// エントリー関数を示す属性名（`#[entry]`の`entry`）
    pub entry_attribute: String,
    /// 入れ子モジュールの最大深さ
    pub max_module_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            entry_attribute: DEFAULT_ENTRY_ATTRIBUTE.to_string(),
            max_module_depth: DEFAULT_MAX_MODULE_DEPTH,
        }
    }
}

/// スクリプトのソースと診断出力用のファイル表
pub struct ScriptSource {
    pub name: String,
    pub source: String,
    pub files: SimpleFiles<String, String>,
    pub file_id: usize,
}

impl ScriptSource {
    /// ファイルから読み込む
    pub fn from_path<P: AsRef<Path>>(path: P) -> JitResult<Self> {
        let name = path.as_ref().display().to_string();
        let source = fs::read_to_string(path.as_ref())
            .map_err(|e| JitError::Io(format!("{} を読み込めません: {}", name, e)))?;
        Ok(Self::from_string(&name, source))
    }

    /// 文字列から作成
    pub fn from_string(name: &str, source: String) -> Self {
        let mut files = SimpleFiles::new();
        let file_id = files.add(name.to_string(), source.clone());
        Self {
            name: name.to_string(),
            source,
            files,
            file_id,
        }
    }

    /// synで構文解析
    pub fn parse(&self) -> JitResult<syn::File> {
        Ok(syn::parse_file(&self.source)?)
    }

    /// エラーを標準エラー出力に報告
    pub fn report(&self, error: &JitError) -> JitResult<()> {
        self.report_all(std::slice::from_ref(error))
    }

    /// 複数のエラーをまとめて報告
    pub fn report_all(&self, errors: &[JitError]) -> JitResult<()> {
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = codespan_reporting::term::Config::default();

        for error in errors {
            let diagnostic = DiagnosticError::new(error.clone(), self.file_id).to_diagnostic(&self.source);
            codespan_reporting::term::emit(&mut writer.lock(), &config, &self.files, &diagnostic)
                .map_err(|e| JitError::Io(format!("failed to emit diagnostic: {}", e)))?;
        }
        Ok(())
    }
}

/// コンパイルパイプライン
///
/// `compile`中は不変なので、別々のスクリプトを別スレッドでコンパイルできる。
pub struct Compiler {
    options: CompileOptions,
    resolver: Box<dyn ModuleResolver + Send + Sync>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl Compiler {
    /// 単一ファイル用のコンパイラを作成
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            resolver: Box::new(NoModules),
        }
    }

    /// `mod name;`の解決方法を設定
    pub fn with_resolver<R>(mut self, resolver: R) -> Self
    where
        R: ModuleResolver + Send + Sync + 'static,
    {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// IR構築
    pub fn build_ir(&self, file: &syn::File) -> JitResult<Module> {
        let started = Instant::now();
        let module = ModuleBuilder::new(&self.options, self.resolver.as_ref()).build(file)?;
        log::debug!("ir: built in {:?}", started.elapsed());
        Ok(module)
    }

    /// IR構築と型検査（最初のエラーで停止）
    pub fn check(&self, file: &syn::File) -> JitResult<CheckedModule> {
        let module = self.build_ir(file)?;
        let started = Instant::now();
        let checked = TypeChecker::new().check(&module)?;
        log::debug!("check: {} functions in {:?}", checked.functions().len(), started.elapsed());
        Ok(checked)
    }

    /// 型エラーをすべて収集する検査（診断用）
    pub fn check_all(&self, file: &syn::File) -> Result<CheckedModule, Vec<JitError>> {
        let module = self.build_ir(file).map_err(|e| vec![e])?;
        TypeChecker::new()
            .check_all(&module)
            .map_err(|errors| errors.into_iter().map(JitError::from).collect())
    }

    /// 構文木をマシンコードにコンパイル
    pub fn compile(&self, file: &syn::File) -> JitResult<CompiledUnit> {
        let checked = self.check(file)?;
        let started = Instant::now();
        let unit = CodeGenerator::new().generate(&checked)?;
        log::debug!("codegen: {} bytes in {:?}", unit.len(), started.elapsed());
        Ok(unit)
    }

    /// ソース文字列をコンパイル
    pub fn compile_source(&self, source: &str) -> JitResult<CompiledUnit> {
        let started = Instant::now();
        let file = syn::parse_file(source)?;
        log::debug!("parse: {} items in {:?}", file.items.len(), started.elapsed());
        self.compile(&file)
    }

    /// コンパイル済みユニットを実行可能メモリにロード
    pub fn load(&self, unit: &CompiledUnit) -> JitResult<ExecutableImage> {
        let started = Instant::now();
        let image = ExecutableImage::load(unit)?;
        log::debug!("load: {} bytes mapped in {:?}", image.mapped_len(), started.elapsed());
        Ok(image)
    }

    /// コンパイル、ロード、実行、解放までを一度に行う
    pub fn run_source(&self, source: &str) -> JitResult<Value> {
        let unit = self.compile_source(source)?;
        let image = self.load(&unit)?;
        let value = image.invoke();
        log::debug!("run: {} returned {}", image.entry_path(), value);
        image.release();
        Ok(value)
    }
}

/// デフォルト設定で構文木をコンパイル
pub fn compile(file: &syn::File) -> JitResult<CompiledUnit> {
    Compiler::default().compile(file)
}

/// ユニットをロード
pub fn load(unit: &CompiledUnit) -> JitResult<ExecutableImage> {
    Ok(ExecutableImage::load(unit)?)
}

/// デフォルト設定でソースを実行
pub fn run_source(source: &str) -> JitResult<Value> {
    Compiler::default().run_source(source)
}

/// ホットリロード
///
/// 新しいバージョンを先にコンパイル・ロードし、成功した場合だけ差し替える。
/// 失敗したときは以前のイメージがそのまま残る。
pub struct HotReloader {
    compiler: Compiler,
    current: Option<ExecutableImage>,
    generation: u64,
}

impl HotReloader {
    pub fn new(compiler: Compiler) -> Self {
        Self {
            compiler,
            current: None,
            generation: 0,
        }
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// 構文木から再ロード
    ///
    /// 成功時は置き換えられた古いイメージを返す。呼び出し中の処理が
    /// なくなってから破棄すること。
    pub fn reload(&mut self, file: &syn::File) -> JitResult<Option<ExecutableImage>> {
        let unit = self.compiler.compile(file)?;
        self.install(&unit)
    }

    /// ソース文字列から再ロード
    pub fn reload_source(&mut self, source: &str) -> JitResult<Option<ExecutableImage>> {
        let unit = self.compiler.compile_source(source)?;
        self.install(&unit)
    }

    fn install(&mut self, unit: &CompiledUnit) -> JitResult<Option<ExecutableImage>> {
        let image = self.compiler.load(unit)?;
        self.generation += 1;
        log::info!("hot reload: generation {} installed ({} bytes)", self.generation, unit.len());
        Ok(self.current.replace(image))
    }

    /// 現在のイメージ
    pub fn current(&self) -> Option<&ExecutableImage> {
        self.current.as_ref()
    }

    /// 現在のイメージのエントリーを実行
    pub fn invoke(&self) -> Option<Value> {
        self.current.as_ref().map(ExecutableImage::invoke)
    }

    /// 成功したロードの回数
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 現在のイメージを取り外す
    pub fn unload(&mut self) -> Option<ExecutableImage> {
        self.current.take()
    }
}
